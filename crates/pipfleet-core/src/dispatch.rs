//! Operation kind to execution strategy.

use crate::handlers::{
    DeletionHandler, ExtractedInformationHandler, FindVirtualEnvsHandler,
    InstalledLibrariesHandler, NullHandler, VirtualEnvDeletionHandler,
};
use crate::postprocess::{
    InstalledLibrariesPostProcessor, InstalledVirtualEnvsPostProcessor, NullPostProcessor,
    OutputPostProcessor,
};
use crate::vars::{additional_extra_vars, synchronization_extra_vars};
use pipfleet_schema::{Operation, OperationKind};
use serde_json::{Map, Value};

pub type ExtraVarsBuilder = fn(&Operation) -> Map<String, Value>;

pub struct KindStrategy {
    /// Playbook file stem.
    pub playbook: &'static str,
    pub extra_vars: Option<ExtraVarsBuilder>,
    pub post_processor: fn() -> Box<dyn OutputPostProcessor>,
    pub handler: &'static dyn ExtractedInformationHandler,
}

fn null_post_processor() -> Box<dyn OutputPostProcessor> {
    Box::new(NullPostProcessor)
}

fn libraries_post_processor() -> Box<dyn OutputPostProcessor> {
    Box::<InstalledLibrariesPostProcessor>::default()
}

fn virtual_envs_post_processor() -> Box<dyn OutputPostProcessor> {
    Box::<InstalledVirtualEnvsPostProcessor>::default()
}

pub fn strategy(kind: OperationKind) -> KindStrategy {
    let playbook = kind.playbook();
    match kind {
        OperationKind::Initialize => KindStrategy {
            playbook,
            extra_vars: None,
            post_processor: null_post_processor,
            handler: &NullHandler,
        },
        OperationKind::Synchronize => KindStrategy {
            playbook,
            extra_vars: Some(synchronization_extra_vars),
            post_processor: libraries_post_processor,
            handler: &InstalledLibrariesHandler,
        },
        OperationKind::FindVirtualEnvs => KindStrategy {
            playbook,
            extra_vars: Some(additional_extra_vars),
            post_processor: virtual_envs_post_processor,
            handler: &FindVirtualEnvsHandler,
        },
        OperationKind::FindInstalledLibraries => KindStrategy {
            playbook,
            extra_vars: Some(additional_extra_vars),
            post_processor: libraries_post_processor,
            handler: &InstalledLibrariesHandler,
        },
        OperationKind::DeleteVirtualEnv => KindStrategy {
            playbook,
            extra_vars: Some(additional_extra_vars),
            post_processor: null_post_processor,
            handler: &VirtualEnvDeletionHandler,
        },
        OperationKind::Delete => KindStrategy {
            playbook,
            extra_vars: None,
            post_processor: null_post_processor,
            handler: &DeletionHandler,
        },
    }
}
