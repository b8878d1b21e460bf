//! Live view of active contexts
//!
//! A context joins the view at the end of a successful refresh when
//! `context.live-view.enabled` is `true`, and leaves it when closed. The
//! view holds weak handles only; [`LiveContextsView::render`] produces a
//! TOML document describing every context and its beans.

use crate::context::{ApplicationContext, WeakApplicationContext};
use crate::definition::BeanRole;
use crate::registry::BeanDefinitionRegistry;
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use std::fmt;
use std::sync::Arc;
use toml::{Table, Value};

#[cfg(feature = "logging")]
use tracing::debug;

/// Property that makes a context join the live view
pub const LIVE_VIEW_ENABLED_PROPERTY: &str = "context.live-view.enabled";

static SHARED: Lazy<Arc<LiveContextsView>> = Lazy::new(|| Arc::new(LiveContextsView::new()));

/// One bean as seen by the live view
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BeanSnapshot {
    pub name: String,
    pub scope: String,
    pub type_name: &'static str,
    pub aliases: Vec<String>,
    pub dependencies: Vec<String>,
}

/// One context as seen by the live view
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextSnapshot {
    pub id: String,
    pub display_name: String,
    pub parent: Option<String>,
    pub startup_date: u64,
    pub beans: Vec<BeanSnapshot>,
}

/// Registry of live contexts
pub struct LiveContextsView {
    contexts: RwLock<Vec<(String, WeakApplicationContext)>>,
}

impl LiveContextsView {
    pub fn new() -> Self {
        Self {
            contexts: RwLock::new(Vec::new()),
        }
    }

    /// The process-wide view
    pub fn shared() -> Arc<LiveContextsView> {
        Arc::clone(&SHARED)
    }

    pub fn register(&self, context: &ApplicationContext) {
        let mut contexts = self.contexts.write();
        contexts.retain(|(id, _)| id != context.id());
        contexts.push((context.id().to_string(), context.downgrade()));

        #[cfg(feature = "logging")]
        debug!(target: "application_context", context = context.id(), "Joined live view");
    }

    pub fn unregister(&self, id: &str) -> bool {
        let mut contexts = self.contexts.write();
        let before = contexts.len();
        contexts.retain(|(registered, _)| registered != id);
        contexts.len() != before
    }

    pub fn len(&self) -> usize {
        self.contexts.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.contexts.read().is_empty()
    }

    pub fn context_ids(&self) -> Vec<String> {
        self.contexts.read().iter().map(|(id, _)| id.clone()).collect()
    }

    /// Describe every live context that is still active
    pub fn snapshot(&self) -> Vec<ContextSnapshot> {
        let contexts: Vec<ApplicationContext> = self
            .contexts
            .read()
            .iter()
            .filter_map(|(_, weak)| weak.upgrade())
            .filter(ApplicationContext::is_active)
            .collect();
        contexts.iter().map(snapshot_of).collect()
    }

    /// The snapshot as a TOML document with one `[[contexts]]` table per context
    pub fn render(&self) -> String {
        let contexts = self
            .snapshot()
            .into_iter()
            .map(|context| {
                let mut table = Table::new();
                table.insert("id".into(), Value::String(context.id));
                table.insert("display_name".into(), Value::String(context.display_name));
                if let Some(parent) = context.parent {
                    table.insert("parent".into(), Value::String(parent));
                }
                table.insert(
                    "startup_date".into(),
                    Value::Integer(i64::try_from(context.startup_date).unwrap_or(i64::MAX)),
                );
                let beans = context.beans.into_iter().map(|bean| {
                    let mut table = Table::new();
                    table.insert("name".into(), Value::String(bean.name));
                    table.insert("scope".into(), Value::String(bean.scope));
                    table.insert("type".into(), Value::String(bean.type_name.to_string()));
                    table.insert("aliases".into(), strings(bean.aliases));
                    table.insert("dependencies".into(), strings(bean.dependencies));
                    Value::Table(table)
                });
                table.insert("beans".into(), Value::Array(beans.collect()));
                Value::Table(table)
            })
            .collect();

        let mut root = Table::new();
        root.insert("contexts".into(), Value::Array(contexts));
        root.to_string()
    }
}

fn strings(values: Vec<String>) -> Value {
    Value::Array(values.into_iter().map(Value::String).collect())
}

fn snapshot_of(context: &ApplicationContext) -> ContextSnapshot {
    let beans = match context.bean_factory() {
        Ok(factory) => factory
            .bean_definition_names()
            .into_iter()
            .filter_map(|name| {
                let definition = factory.bean_definition_if_present(&name)?;
                if definition.role() == BeanRole::Infrastructure {
                    return None;
                }
                Some(BeanSnapshot {
                    scope: definition.scope().name().to_string(),
                    type_name: definition.type_name(),
                    aliases: crate::registry::AliasRegistry::aliases(&*factory, &name),
                    dependencies: factory.dependencies_of(&name),
                    name,
                })
            })
            .collect(),
        Err(_) => Vec::new(),
    };
    ContextSnapshot {
        id: context.id().to_string(),
        display_name: context.display_name().to_string(),
        parent: context.parent().map(|parent| parent.id().to_string()),
        startup_date: context.startup_date(),
        beans,
    }
}

impl Default for LiveContextsView {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for LiveContextsView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LiveContextsView")
            .field("contexts", &self.context_ids())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::BeanDefinitionBuilder;
    use crate::registry::AliasRegistry;
    use crate::shutdown::ShutdownHookRegistry;

    struct Repo;

    struct Service {
        _repo: Arc<Repo>,
    }

    fn context(view: &Arc<LiveContextsView>) -> ApplicationContext {
        let ctx = ApplicationContext::builder()
            .id("orders")
            .display_name("Orders context")
            .live_view(Arc::clone(view))
            .shutdown_hooks(Arc::new(ShutdownHookRegistry::new()))
            .build();
        ctx.register_bean_definition(
            "repo",
            BeanDefinitionBuilder::<Repo>::new().supplier(|_| Ok(Repo)).build(),
        )
        .unwrap();
        ctx.register_bean_definition(
            "service",
            BeanDefinitionBuilder::<Service>::new()
                .supplier(|factory| {
                    Ok(Service {
                        _repo: factory.get_bean::<Repo>("repo")?,
                    })
                })
                .depends_on("repo")
                .build(),
        )
        .unwrap();
        ctx.register_alias("repo", "repository").unwrap();
        ctx
    }

    #[test]
    fn test_snapshot_describes_beans() {
        let view = Arc::new(LiveContextsView::new());
        let ctx = context(&view);
        ctx.refresh().unwrap();
        view.register(&ctx);

        let snapshot = view.snapshot();
        assert_eq!(snapshot.len(), 1);
        let orders = &snapshot[0];
        assert_eq!(orders.display_name, "Orders context");
        assert!(orders.startup_date > 0);

        let repo = orders.beans.iter().find(|b| b.name == "repo").unwrap();
        assert_eq!(repo.scope, "singleton");
        assert_eq!(repo.aliases, ["repository"]);
        let service = orders.beans.iter().find(|b| b.name == "service").unwrap();
        assert_eq!(service.dependencies, ["repo"]);
    }

    #[test]
    fn test_render_is_valid_toml() {
        let view = Arc::new(LiveContextsView::new());
        let ctx = context(&view);
        ctx.refresh().unwrap();
        view.register(&ctx);

        let parsed: Table = toml::from_str(&view.render()).unwrap();
        let contexts = parsed["contexts"].as_array().unwrap();
        assert_eq!(contexts[0]["id"].as_str(), Some("orders"));
        assert!(contexts[0]["beans"].as_array().unwrap().len() >= 2);
    }

    #[test]
    fn test_dropped_and_closed_contexts_disappear() {
        let view = Arc::new(LiveContextsView::new());
        {
            let ctx = context(&view);
            ctx.refresh().unwrap();
            view.register(&ctx);
            ctx.close();
            assert!(view.snapshot().is_empty());
            view.register(&ctx);
        }
        assert!(view.snapshot().is_empty());
        assert!(view.unregister("orders"));
        assert!(view.is_empty());
    }
}
