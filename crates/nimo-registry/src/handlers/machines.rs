use std::sync::Arc;

use nimo_protocol::commands::registry::{
    ADD_MACHINE, GET_INFORMATION_FOR_ALL_MACHINES, GET_MACHINE_INFORMATION,
    GET_NUMBER_OF_MACHINES, IS_MACHINE_PRESENT,
};
use nimo_protocol::{Arguments, HandlerResult, HandlerTable};

use super::{completed, count, found, present, records};
use crate::registry::RegistryHandle;

pub(super) fn register(table: &mut HandlerTable<RegistryHandle>) {
    table
        .register(ADD_MACHINE, add_machine)
        .register(IS_MACHINE_PRESENT, is_machine_present)
        .register(GET_MACHINE_INFORMATION, get_machine_information)
        .register(GET_INFORMATION_FOR_ALL_MACHINES, get_all_machines)
        .register(GET_NUMBER_OF_MACHINES, get_number_of_machines);
}

/// `addMachine(name, address)`
async fn add_machine(registry: Arc<RegistryHandle>, args: Arguments) -> HandlerResult {
    let name = args.name(0)?;
    let address = args.address(1)?;
    completed(registry.add_machine(name, address).await)
}

async fn is_machine_present(registry: Arc<RegistryHandle>, args: Arguments) -> HandlerResult {
    let name = args.string(0)?;
    present(registry.get_machine(name).await.is_some())
}

async fn get_machine_information(registry: Arc<RegistryHandle>, args: Arguments) -> HandlerResult {
    let name = args.string(0)?;
    found(registry.get_machine(name).await)
}

async fn get_all_machines(registry: Arc<RegistryHandle>, _args: Arguments) -> HandlerResult {
    records(&registry.get_machines().await)
}

async fn get_number_of_machines(registry: Arc<RegistryHandle>, _args: Arguments) -> HandlerResult {
    count(registry.get_counts().await.machines)
}
