//! Model-name registry.
//!
//! This is the only place that maps a model name from the bench
//! configuration to a concrete driver. Everything downstream holds the
//! returned trait object and never inspects the concrete type again.

use std::sync::Arc;

use benchlib_core::capability::{AcSource, Capability, DcLoad, Oscilloscope};
use benchlib_core::config::{InstrumentRole, Timings};
use benchlib_scpi::SharedLink;

/// One model the registry can build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelInfo {
    pub name: &'static str,
    pub vendor: &'static str,
    pub role: InstrumentRole,
}

/// Builds capabilities from model names.
#[derive(Debug, Clone, Default)]
pub struct ModelRegistry {
    timings: Timings,
}

impl ModelRegistry {
    pub fn new(timings: Timings) -> Self {
        Self { timings }
    }

    /// Build the capability `role` calls for on top of `link`.
    ///
    /// Returns `None` when `model` is not known for that role. Load
    /// channels built here are unbound; use [`dc_load`](Self::dc_load) to
    /// place one on a mainframe slot.
    pub fn capability(
        &self,
        role: InstrumentRole,
        model: &str,
        link: SharedLink,
    ) -> Option<Capability> {
        match role {
            InstrumentRole::Oscilloscope => {
                let model = benchlib_tektronix::models::lookup(model)?;
                let scope = benchlib_tektronix::TektronixBuilder::new(model)
                    .opc_timing(self.timings.opc_poll(), self.timings.opc_timeout())
                    .build_with_link(link);
                Some(Capability::Oscilloscope(Arc::new(scope)))
            }
            InstrumentRole::InputSource => {
                if !model.trim().eq_ignore_ascii_case(benchlib_delta::MODEL_NAME) {
                    return None;
                }
                let source = benchlib_delta::DeltaBuilder::new().build_with_link(link);
                Some(Capability::AcSource(Arc::new(source)))
            }
            InstrumentRole::Load => self
                .dc_load(model, link, -1, 0)
                .map(Capability::DcLoad),
            InstrumentRole::Relay | InstrumentRole::Template => None,
        }
    }

    pub fn oscilloscope(&self, model: &str, link: SharedLink) -> Option<Arc<dyn Oscilloscope>> {
        match self.capability(InstrumentRole::Oscilloscope, model, link)? {
            Capability::Oscilloscope(scope) => Some(scope),
            _ => None,
        }
    }

    pub fn ac_source(&self, model: &str, link: SharedLink) -> Option<Arc<dyn AcSource>> {
        match self.capability(InstrumentRole::InputSource, model, link)? {
            Capability::AcSource(source) => Some(source),
            _ => None,
        }
    }

    /// A load channel for module `sub_model` in hardware slot
    /// `real_channel`, bound to parameter-table row `channel_index`.
    pub fn dc_load(
        &self,
        sub_model: &str,
        link: SharedLink,
        real_channel: i32,
        channel_index: i32,
    ) -> Option<Arc<dyn DcLoad>> {
        benchlib_chroma::spec_for(sub_model)?;
        let load = benchlib_chroma::ChromaBuilder::new(sub_model)
            .channel(real_channel, channel_index)
            .build_with_link(link);
        Some(Arc::new(load))
    }
}

/// Every model the registry can build, grouped by role.
pub fn supported_models() -> Vec<ModelInfo> {
    let scopes = benchlib_tektronix::models::all_models()
        .into_iter()
        .map(|m| ModelInfo {
            name: m.name,
            vendor: benchlib_tektronix::models::vendor_for_model(m.name),
            role: InstrumentRole::Oscilloscope,
        });
    let loads = benchlib_chroma::supported_sub_models().map(|name| ModelInfo {
        name,
        vendor: "Chroma",
        role: InstrumentRole::Load,
    });
    let sources = std::iter::once(ModelInfo {
        name: benchlib_delta::MODEL_NAME,
        vendor: "Delta",
        role: InstrumentRole::InputSource,
    });
    scopes.chain(loads).chain(sources).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use benchlib_scpi::InstrumentLink;
    use benchlib_test_harness::MockChannel;

    fn link() -> SharedLink {
        InstrumentLink::new(Box::new(MockChannel::lenient("mock"))).shared()
    }

    #[test]
    fn builds_each_role() {
        let registry = ModelRegistry::default();
        let scope = registry.oscilloscope("dpo7254", link()).unwrap();
        assert_eq!(scope.model(), "DPO7254");

        let source = registry.ac_source("DE-A3000AB", link()).unwrap();
        assert_eq!(source.vendor(), "Delta");

        let load = registry.dc_load("63103", link(), 4, 2).unwrap();
        assert_eq!(load.real_channel(), 4);
        assert_eq!(load.channel_index(), 2);
    }

    #[test]
    fn unknown_models_are_rejected() {
        let registry = ModelRegistry::default();
        assert!(registry.oscilloscope("DSOX3024", link()).is_none());
        assert!(registry.ac_source("DPO7000", link()).is_none());
        assert!(registry.dc_load("6310", link(), 1, 1).is_none());
        assert!(
            registry
                .capability(InstrumentRole::Relay, "DPO7000", link())
                .is_none()
        );
    }

    #[test]
    fn capability_is_tagged_by_role() {
        let registry = ModelRegistry::default();
        let cap = registry
            .capability(InstrumentRole::Load, "63101", link())
            .unwrap();
        assert!(matches!(cap, Capability::DcLoad(_)));
        assert_eq!(cap.model(), "6310");
    }

    #[test]
    fn supported_model_listing() {
        let models = supported_models();
        assert!(models.iter().any(|m| m.name == "DPO7000" && m.vendor == "Tektronix"));
        assert!(models.iter().any(|m| m.name == "63112" && m.role == InstrumentRole::Load));
        assert!(
            models
                .iter()
                .any(|m| m.name == "DE-A3000AB" && m.role == InstrumentRole::InputSource)
        );
    }
}
