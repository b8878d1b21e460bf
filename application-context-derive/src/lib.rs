//! Derive macros for application-context
//!
//! `#[derive(Component)]` implements `application_context::component::Component`
//! for a struct with named fields:
//!
//! - fields marked `#[autowired]` become the component's dependencies and
//!   are resolved from the bean factory on every creation
//! - `#[autowired(optional)]` fields must be `Option<Arc<T>>` and are `None`
//!   when no bean exposes `T`
//! - every other field is filled with `Default::default()`
//!
//! The struct-level `#[component(...)]` attribute becomes the component's
//! annotation metadata.
//!
//! # Example
//!
//! ```rust,ignore
//! use application_context::Component;
//! use std::sync::Arc;
//!
//! #[derive(Component)]
//! struct Database {
//!     url: String,
//! }
//!
//! #[derive(Component)]
//! #[component(name = "users", lazy, qualifier = "primary-store", depends_on = "migrations")]
//! struct UserService {
//!     #[autowired]
//!     db: Arc<Database>,
//!     #[autowired(optional)]
//!     cache: Option<Arc<Cache>>,
//!     // Non-autowired fields use Default
//!     request_count: u64,
//! }
//!
//! // Generated:
//! // impl Component for UserService {
//! //     type Dependencies = (Arc<Database>, Option<Arc<Cache>>);
//! //     fn create((__dep_0, __dep_1): Self::Dependencies) -> Result<Self> {
//! //         Ok(Self { db: __dep_0, cache: __dep_1, request_count: Default::default() })
//! //     }
//! //     fn metadata() -> AnnotationMetadata { ... }
//! // }
//! ```

use proc_macro::TokenStream;
use quote::quote;
use syn::{Attribute, Data, DeriveInput, Fields, LitBool, LitStr, Type, parse_macro_input};

/// Derive macro for the `Component` trait.
///
/// # Struct attributes
///
/// `#[component(...)]` accepts:
///
/// - `name = "..."` - explicit bean name
/// - `scope = "..."` - scope name (`singleton`, `prototype` or a custom scope)
/// - `proxy = "..."` - scoped proxy mode (`no`, `interfaces`, `target_class`); requires `scope`
/// - `lazy` / `lazy = false` - lazy initialization
/// - `primary` - preferred candidate for its type
/// - `qualifier = "..."` - may be repeated
/// - `depends_on = "a, b"` - beans initialized before this one
/// - `profile = "dev, !prod"` - profiles the component is registered for
/// - `description = "..."`
///
/// # Field attributes
///
/// - `#[autowired]` - resolve the field from the bean factory. The field type
///   must be resolvable: `Arc<T>`, `Option<Arc<T>>`, `Vec<Arc<T>>` or `BeanProvider<T>`.
/// - `#[autowired(optional)]` - the field must be `Option<Arc<T>>`.
#[proc_macro_derive(Component, attributes(component, autowired))]
pub fn derive_component(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    match expand_component(&input) {
        Ok(expanded) => TokenStream::from(expanded),
        Err(err) => err.to_compile_error().into(),
    }
}

fn expand_component(input: &DeriveInput) -> syn::Result<proc_macro2::TokenStream> {
    let name = &input.ident;
    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();

    // Only support structs with named fields
    let fields = match &input.data {
        Data::Struct(data) => match &data.fields {
            Fields::Named(fields) => &fields.named,
            Fields::Unit => {
                let metadata = component_metadata(&input.attrs)?;
                return Ok(quote! {
                    impl #impl_generics ::application_context::component::Component for #name #ty_generics #where_clause {
                        type Dependencies = ();

                        fn create(_: Self::Dependencies) -> ::application_context::Result<Self> {
                            Ok(Self)
                        }

                        fn metadata() -> ::application_context::metadata::AnnotationMetadata {
                            #metadata
                        }
                    }
                });
            }
            Fields::Unnamed(_) => {
                return Err(syn::Error::new_spanned(
                    input,
                    "Component can only be derived for structs with named fields",
                ));
            }
        },
        _ => {
            return Err(syn::Error::new_spanned(input, "Component can only be derived for structs"));
        }
    };

    // Collect dependency types and field initializers
    let mut dep_types: Vec<&Type> = Vec::new();
    let mut dep_names: Vec<syn::Ident> = Vec::new();
    let mut field_inits: Vec<proc_macro2::TokenStream> = Vec::new();

    for field in fields.iter() {
        let Some(field_name) = field.ident.as_ref() else {
            return Err(syn::Error::new_spanned(field, "expected a named field"));
        };
        let field_type = &field.ty;

        match find_autowired_attr(&field.attrs)? {
            Some(Autowired::Required) => {
                let dep_name = syn::Ident::new(&format!("__dep_{}", dep_types.len()), field_name.span());
                field_inits.push(quote! { #field_name: #dep_name });
                dep_types.push(field_type);
                dep_names.push(dep_name);
            }
            Some(Autowired::Optional) => {
                if extract_option_arc_inner_type(field_type).is_none() {
                    return Err(syn::Error::new_spanned(
                        field_type,
                        "Fields marked with #[autowired(optional)] must have type Option<Arc<T>>",
                    ));
                }
                let dep_name = syn::Ident::new(&format!("__dep_{}", dep_types.len()), field_name.span());
                field_inits.push(quote! { #field_name: #dep_name });
                dep_types.push(field_type);
                dep_names.push(dep_name);
            }
            None => {
                field_inits.push(quote! {
                    #field_name: ::std::default::Default::default()
                });
            }
        }
    }

    let (deps_type, deps_pattern) = match dep_types.len() {
        0 => (quote! { () }, quote! { _ }),
        1 => {
            let ty = dep_types[0];
            let name = &dep_names[0];
            (quote! { #ty }, quote! { #name })
        }
        _ => (quote! { (#(#dep_types),*) }, quote! { (#(#dep_names),*) }),
    };

    let metadata = component_metadata(&input.attrs)?;

    Ok(quote! {
        impl #impl_generics ::application_context::component::Component for #name #ty_generics #where_clause {
            type Dependencies = #deps_type;

            fn create(#deps_pattern: Self::Dependencies) -> ::application_context::Result<Self> {
                Ok(Self {
                    #(#field_inits),*
                })
            }

            fn metadata() -> ::application_context::metadata::AnnotationMetadata {
                #metadata
            }
        }
    })
}

// =============================================================================
// #[component(...)]
// =============================================================================

#[derive(Default)]
struct ComponentAttrs {
    name: Option<LitStr>,
    scope: Option<LitStr>,
    proxy: Option<LitStr>,
    lazy: Option<bool>,
    primary: bool,
    qualifiers: Vec<LitStr>,
    depends_on: Vec<LitStr>,
    profile: Option<LitStr>,
    description: Option<LitStr>,
}

fn parse_component_attrs(attrs: &[Attribute]) -> syn::Result<ComponentAttrs> {
    let mut parsed = ComponentAttrs::default();
    for attr in attrs.iter().filter(|a| a.path().is_ident("component")) {
        // Bare #[component]
        if attr.meta.require_path_only().is_ok() {
            continue;
        }
        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("name") {
                parsed.name = Some(meta.value()?.parse()?);
            } else if meta.path.is_ident("scope") {
                parsed.scope = Some(meta.value()?.parse()?);
            } else if meta.path.is_ident("proxy") {
                let mode: LitStr = meta.value()?.parse()?;
                if !matches!(mode.value().as_str(), "default" | "no" | "interfaces" | "target_class") {
                    return Err(syn::Error::new_spanned(
                        &mode,
                        "proxy must be one of \"default\", \"no\", \"interfaces\", \"target_class\"",
                    ));
                }
                parsed.proxy = Some(mode);
            } else if meta.path.is_ident("lazy") {
                parsed.lazy = Some(if meta.input.peek(syn::Token![=]) {
                    meta.value()?.parse::<LitBool>()?.value
                } else {
                    true
                });
            } else if meta.path.is_ident("primary") {
                parsed.primary = true;
            } else if meta.path.is_ident("qualifier") {
                parsed.qualifiers.push(meta.value()?.parse()?);
            } else if meta.path.is_ident("depends_on") {
                parsed.depends_on.push(meta.value()?.parse()?);
            } else if meta.path.is_ident("profile") {
                parsed.profile = Some(meta.value()?.parse()?);
            } else if meta.path.is_ident("description") {
                parsed.description = Some(meta.value()?.parse()?);
            } else {
                return Err(meta.error("unsupported component attribute"));
            }
            Ok(())
        })?;
    }

    if let (Some(proxy), None) = (&parsed.proxy, &parsed.scope) {
        return Err(syn::Error::new_spanned(proxy, "proxy requires a scope"));
    }
    Ok(parsed)
}

/// Build the `AnnotationMetadata` expression for the struct
fn component_metadata(attrs: &[Attribute]) -> syn::Result<proc_macro2::TokenStream> {
    let parsed = parse_component_attrs(attrs)?;
    let names = quote! { ::application_context::metadata::names };
    let annotation = quote! { ::application_context::metadata::Annotation };

    let mut annotations = Vec::new();
    annotations.push(match &parsed.name {
        Some(name) => quote! { #annotation::with_value(#names::COMPONENT, #name) },
        None => quote! { #annotation::new(#names::COMPONENT) },
    });
    if let Some(scope) = &parsed.scope {
        annotations.push(match &parsed.proxy {
            Some(proxy) => quote! {
                #annotation::with_value(#names::SCOPE, #scope)
                    .attribute(::application_context::scope::PROXY_MODE_ATTRIBUTE, #proxy)
            },
            None => quote! { #annotation::with_value(#names::SCOPE, #scope) },
        });
    }
    match parsed.lazy {
        Some(true) => annotations.push(quote! { #annotation::new(#names::LAZY) }),
        Some(false) => annotations.push(quote! { #annotation::with_value(#names::LAZY, "false") }),
        None => {}
    }
    if parsed.primary {
        annotations.push(quote! { #annotation::new(#names::PRIMARY) });
    }
    for qualifier in &parsed.qualifiers {
        annotations.push(quote! { #annotation::with_value(#names::QUALIFIER, #qualifier) });
    }
    for depends_on in &parsed.depends_on {
        annotations.push(quote! { #annotation::with_value(#names::DEPENDS_ON, #depends_on) });
    }
    if let Some(profile) = &parsed.profile {
        annotations.push(quote! { #annotation::with_value(#names::PROFILE, #profile) });
    }
    if let Some(description) = &parsed.description {
        annotations.push(quote! { #annotation::with_value(#names::DESCRIPTION, #description) });
    }

    Ok(quote! {
        ::application_context::metadata::AnnotationMetadata::for_type::<Self>()
            #(.with(#annotations))*
    })
}

// =============================================================================
// #[autowired]
// =============================================================================

enum Autowired {
    Required,
    Optional,
}

/// Find and parse the #[autowired] attribute
fn find_autowired_attr(attrs: &[Attribute]) -> syn::Result<Option<Autowired>> {
    for attr in attrs {
        if attr.path().is_ident("autowired") {
            if attr.meta.require_path_only().is_ok() {
                return Ok(Some(Autowired::Required));
            }

            let nested = attr.parse_args::<syn::Ident>()?;
            if nested == "optional" {
                return Ok(Some(Autowired::Optional));
            }
            return Err(syn::Error::new_spanned(nested, "expected #[autowired] or #[autowired(optional)]"));
        }
    }
    Ok(None)
}

/// Extract T from Arc<T>
fn extract_arc_inner_type(ty: &Type) -> Option<&Type> {
    if let Type::Path(type_path) = ty {
        let segment = type_path.path.segments.last()?;
        if segment.ident == "Arc" {
            if let syn::PathArguments::AngleBracketed(args) = &segment.arguments {
                if let Some(syn::GenericArgument::Type(inner)) = args.args.first() {
                    return Some(inner);
                }
            }
        }
    }
    None
}

/// Extract T from Option<Arc<T>>
fn extract_option_arc_inner_type(ty: &Type) -> Option<&Type> {
    if let Type::Path(type_path) = ty {
        let segment = type_path.path.segments.last()?;
        if segment.ident == "Option" {
            if let syn::PathArguments::AngleBracketed(args) = &segment.arguments {
                if let Some(syn::GenericArgument::Type(inner)) = args.args.first() {
                    return extract_arc_inner_type(inner);
                }
            }
        }
    }
    None
}
