#![no_main]

//! Fuzz target for the bean definition registry
//!
//! Registers, aliases and removes definitions in arbitrary order and checks
//! that alias resolution always terminates at a name that is not an alias.

use application_context::{AliasRegistry, BeanDefinitionBuilder, BeanDefinitionRegistry, BeanFactory};
use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;

#[derive(Debug, Arbitrary)]
enum RegistryOp {
    Register(u8),
    Remove(u8),
    Alias(u8, u8),
    RemoveAlias(u8),
    Lookup(u8),
    SetOverriding(bool),
    Freeze,
}

fn name(n: u8) -> String {
    format!("bean{}", n % 8)
}

fuzz_target!(|ops: Vec<RegistryOp>| {
    let factory = BeanFactory::new();
    let mut frozen = false;

    for op in ops.into_iter().take(200) {
        match op {
            RegistryOp::Register(n) => {
                let value = u32::from(n);
                let result = factory.register_bean_definition(
                    &name(n),
                    BeanDefinitionBuilder::<u32>::new().supplier(move |_| Ok(value)).build(),
                );
                if result.is_ok() {
                    assert!(factory.contains_bean_definition(&name(n)));
                }
                if frozen {
                    assert!(result.is_err(), "frozen registry accepted a definition");
                }
            }
            RegistryOp::Remove(n) => {
                if factory.remove_bean_definition(&name(n)).is_ok() {
                    assert!(!factory.contains_bean_definition(&name(n)));
                }
            }
            RegistryOp::Alias(n, m) => {
                let _ = factory.register_alias(&name(n), &name(m));
            }
            RegistryOp::RemoveAlias(n) => {
                if factory.remove_alias(&name(n)).is_ok() {
                    assert!(!factory.is_alias(&name(n)));
                }
            }
            RegistryOp::Lookup(n) => {
                let canonical = factory.canonical_name(&name(n));
                assert!(!factory.is_alias(&canonical));
                if let Ok(value) = factory.get_bean::<u32>(&name(n)) {
                    assert!(*value < 256);
                }
            }
            RegistryOp::SetOverriding(allow) => factory.set_allow_definition_overriding(allow),
            RegistryOp::Freeze => {
                factory.freeze_configuration();
                frozen = true;
            }
        }

        assert_eq!(factory.bean_definition_names().len(), factory.bean_definition_count());
    }
});
