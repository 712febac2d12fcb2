use buildyard_sdk::BuiltinModule;

use super::{Builtin, Registration};
use crate::bundle::LoaderRule;
use crate::signal::{Signal, SignalKind};

#[derive(BuiltinModule)]
#[module(
    id = "template-cache",
    kind = "buildtask",
    description = "Preload *.template.html files into the template cache"
)]
pub struct TemplateCache;

impl Builtin for TemplateCache {
    fn register(&self, reg: &mut Registration<'_>) -> anyhow::Result<()> {
        reg.on(SignalKind::BuildBundleConfig, |signal, _| {
            if let Signal::BuildBundleConfig(config) = signal {
                config.rules.push(LoaderRule::new(
                    r"\.template\.html$",
                    ["ng-cache-loader?prefix=*"],
                ));
            }
            Ok(())
        });
        Ok(())
    }
}
