use std::sync::Arc;

use nimo_core::ApplicationInfo;
use nimo_protocol::commands::registry::{
    ADD_APP_TO_LIST, CLEAR_APP_LIST_FOR_LAUNCHER, GET_INFORMATION_FOR_ALL_APPLICATIONS,
    GET_INFORMATION_FOR_ALL_APPLICATIONS_ON_NODE,
};
use nimo_protocol::{Arguments, HandlerResult, HandlerTable};

use super::{completed, records};
use crate::registry::{ApplicationFilter, RegistryHandle};

pub(super) fn register(table: &mut HandlerTable<RegistryHandle>) {
    table
        .register(ADD_APP_TO_LIST, add_app_to_list)
        .register(CLEAR_APP_LIST_FOR_LAUNCHER, clear_app_list)
        .register(GET_INFORMATION_FOR_ALL_APPLICATIONS, get_all_applications)
        .register(GET_INFORMATION_FOR_ALL_APPLICATIONS_ON_NODE, get_applications_on_node);
}

/// `addAppToList(launcherNode, appName, appDescription)`
async fn add_app_to_list(registry: Arc<RegistryHandle>, args: Arguments) -> HandlerResult {
    let application = ApplicationInfo {
        launcher_node: args.name(0)?,
        app_name: args.name(1)?,
        app_description: args.string(2)?,
    };
    completed(registry.add_application(application).await)
}

async fn clear_app_list(registry: Arc<RegistryHandle>, args: Arguments) -> HandlerResult {
    let launcher = args.string(0)?;
    completed(registry.clear_applications(launcher).await)
}

async fn get_all_applications(registry: Arc<RegistryHandle>, _args: Arguments) -> HandlerResult {
    records(&registry.get_applications(ApplicationFilter::All).await)
}

async fn get_applications_on_node(registry: Arc<RegistryHandle>, args: Arguments) -> HandlerResult {
    let launcher = args.string(0)?;
    records(&registry.get_applications(ApplicationFilter::OnLauncher(launcher)).await)
}
