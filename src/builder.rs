use std::{
    path::Path,
    sync::{Arc, Mutex},
};

use crate::{
    Config, Result,
    events::EventBus,
    gatekeeper::ValidationRule,
    manager::{ConfiguredNodeRestore, EdgeLifecycleManager, NeverRestore, RestorePolicy, SharedManager},
    surface::RenderSurface,
};

#[derive(Default)]
pub struct ManagerBuilder {
    config: Config,
    surface: Option<Arc<dyn RenderSurface>>,
    events: Option<EventBus>,
    restore: Option<Box<dyn RestorePolicy>>,
    rules: Vec<Box<dyn ValidationRule>>,
}

impl ManagerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn config(
        mut self,
        config: Config,
    ) -> Self {
        self.config = config;
        self
    }

    /// Load the config from a TOML file.
    pub fn config_file<T: AsRef<Path>>(
        mut self,
        path: T,
    ) -> Result<Self> {
        self.config = Config::create(path)?;
        Ok(self)
    }

    /// Attach a surface; the built manager is initialized against it.
    pub fn surface(
        mut self,
        surface: Arc<dyn RenderSurface>,
    ) -> Self {
        self.surface = Some(surface);
        self
    }

    /// Share an existing event bus, e.g. one the host already subscribed to.
    pub fn events(
        mut self,
        events: EventBus,
    ) -> Self {
        self.events = Some(events);
        self
    }

    pub fn restore_policy(
        mut self,
        policy: Box<dyn RestorePolicy>,
    ) -> Self {
        self.restore = Some(policy);
        self
    }

    /// Append a gatekeeper rule after the defaults.
    pub fn rule(
        mut self,
        rule: Box<dyn ValidationRule>,
    ) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn build(self) -> Result<EdgeLifecycleManager> {
        self.config.validate()?;
        let restore: Box<dyn RestorePolicy> = match self.restore {
            Some(policy) => policy,
            None if self.config.restore_previews => Box::new(ConfiguredNodeRestore),
            None => Box::new(NeverRestore),
        };
        let mut manager = EdgeLifecycleManager::with_parts(self.config, self.events.unwrap_or_default(), restore, self.rules);
        if let Some(surface) = self.surface {
            manager.initialize(surface)?;
        }
        Ok(manager)
    }

    pub fn build_shared(self) -> Result<SharedManager> {
        Ok(Arc::new(Mutex::new(self.build()?)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        FlowlinesError, PolicyViolation,
        events::EdgeEvent,
        gatekeeper::{ConnectionOptions, RuleContext},
        model::{NodeInfo, Point, Size},
        surface::MemSurface,
    };

    struct NoEntryInto(&'static str);

    impl ValidationRule for NoEntryInto {
        fn name(&self) -> &str {
            "no-entry"
        }

        fn check(
            &self,
            ctx: &RuleContext<'_>,
        ) -> Option<PolicyViolation> {
            (ctx.target_node_id == self.0).then(|| PolicyViolation::Custom {
                message: format!("{} is closed", self.0),
            })
        }
    }

    fn surface() -> Arc<MemSurface> {
        let surface = MemSurface::new();
        surface.add_node(NodeInfo::new("a", Point::new(0.0, 0.0), Size::new(100.0, 40.0)));
        surface.add_node(NodeInfo::new("b", Point::new(0.0, 200.0), Size::new(100.0, 40.0)));
        Arc::new(surface)
    }

    #[test]
    fn test_build_initializes_with_surface() {
        let bus = EventBus::new();
        let manager = ManagerBuilder::new().surface(surface()).events(bus.clone()).restore_policy(Box::new(NeverRestore)).build().unwrap();
        assert!(manager.is_initialized());
        assert_eq!(manager.restore_policy().name(), "never");
        // the shared bus saw the initialization
        assert_eq!(bus.emitted(), 1);
    }

    #[test]
    fn test_build_without_surface() {
        let manager = ManagerBuilder::new().build().unwrap();
        assert!(!manager.is_initialized());
        assert_eq!(manager.restore_policy().name(), "configured-node");
    }

    #[test]
    fn test_invalid_config_is_refused() {
        let config = Config {
            batch_size: 0,
            ..Default::default()
        };
        assert!(matches!(ManagerBuilder::new().config(config).build(), Err(FlowlinesError::Config(_))));
    }

    #[test]
    fn test_extra_rules_apply() {
        let shared = ManagerBuilder::new()
            .config(Config {
                allow_direct_connection: true,
                ..Default::default()
            })
            .surface(surface())
            .rule(Box::new(NoEntryInto("b")))
            .build_shared()
            .unwrap();
        let mut manager = shared.lock().unwrap();
        assert!(manager.gatekeeper().rule_names().contains(&"no-entry"));

        let created = Arc::new(Mutex::new(0));
        let counter = created.clone();
        manager
            .events()
            .subscribe("connection:*", move |_: &EdgeEvent| {
                *counter.lock().unwrap() += 1;
            })
            .unwrap();
        let outcome = manager.create_connection_via_controller("a", "b", ConnectionOptions::default()).unwrap();
        assert!(!outcome.success);
        assert!(matches!(outcome.error, Some(PolicyViolation::Custom { .. })));
        assert_eq!(*created.lock().unwrap(), 0);
    }
}
