//! Re-export hub: `main.rs` dispatches to these without reaching into the
//! per-domain modules directly.

pub use crate::args::*;
pub use crate::instance::{
    execute_create as execute_create_instance, execute_delete as execute_delete_instance,
    execute_get as execute_get_instance, execute_list as execute_list_instances,
    execute_restart as execute_restart_instance, execute_start as execute_start_instance,
    execute_stats as execute_instance_stats, execute_stop as execute_stop_instance,
};
pub use crate::network::{
    execute_allocate_ip, execute_create_network, execute_create_subnet, execute_delete_subnet,
    execute_get_network, execute_list_allocations, execute_list_networks, execute_list_subnets,
    execute_list_vteps, execute_release_ip,
};
pub use crate::node::{
    execute_deregister as execute_deregister_node, execute_get as execute_get_node,
    execute_list as execute_list_nodes, execute_register as execute_register_node,
};
