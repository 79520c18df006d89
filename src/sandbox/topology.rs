//! Provisioning and teardown of per-user sandbox topologies.
//!
//! A topology is one controller container (running ansible-playbook), N
//! managed nodes reachable over SSH, and a private bridge network tying them
//! together. Containers and networks are labelled so the sweeper can find
//! them after a process restart; durable rows hold the IDs for convenience
//! but the labels are authoritative.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::config::SandboxConfig;
use crate::error::SandboxError;
use crate::sandbox::docker_client::{ContainerSpec, DockerClient};
use crate::sandbox::resources::ResourceCaps;

/// Label value identifying every resource this application creates.
pub const APP_LABEL: &str = "ansibox";

/// Label key for the application marker.
pub const LABEL_APP: &str = "app";
/// Label key for the owning user.
pub const LABEL_USER: &str = "user_id";
/// Label key for the container role.
pub const LABEL_TYPE: &str = "type";
/// Label key tying managed nodes and networks to their topology.
pub const LABEL_PARENT: &str = "parent";

/// Role label value for the controller container.
pub const TYPE_CONTROL_NODE: &str = "control_node";
/// Role label value for managed nodes.
pub const TYPE_MANAGED_NODE: &str = "managed_node";

/// Directory inside the controller holding playbook and inventory.
pub const ANSIBLE_DIR: &str = "/ansible";

/// Grace period for containers to come up before node setup starts.
const STARTUP_GRACE: Duration = Duration::from_secs(2);

/// Commands preparing a managed node to be reached by the controller:
/// SSH server, Python for Ansible modules, and a sudo-capable user.
const NODE_SETUP_COMMANDS: [&str; 6] = [
    "apt-get update",
    "apt-get install -y python3 python3-pip openssh-server sudo",
    "service ssh start",
    "useradd -m -s /bin/bash ansible",
    "echo 'ansible:ansible' | chpasswd",
    "echo 'ansible ALL=(ALL) NOPASSWD:ALL' >> /etc/sudoers",
];

/// Computes the globally unique topology name for a user session.
pub fn topology_name(user_id: &str, tag: &str) -> String {
    format!("{APP_LABEL}_{user_id}_{tag}")
}

/// Computes the network name for a user session.
pub fn network_name(user_id: &str, tag: &str) -> String {
    format!("{APP_LABEL}_net_{user_id}_{tag}")
}

/// Name of the i-th managed node (1-based) in a topology.
pub fn node_name(topology: &str, index: usize) -> String {
    format!("{topology}_node{index}")
}

/// A successfully provisioned topology.
#[derive(Debug, Clone)]
pub struct ProvisionedTopology {
    /// Docker ID of the controller container.
    pub controller_id: String,
    /// Name shared by every resource in the topology.
    pub topology_name: String,
}

/// Creates and destroys isolated multi-container sandbox topologies.
pub struct TopologyManager {
    docker: Arc<DockerClient>,
    config: SandboxConfig,
}

impl TopologyManager {
    /// Creates a new topology manager.
    pub fn new(docker: Arc<DockerClient>, config: SandboxConfig) -> Self {
        Self { docker, config }
    }

    /// Provisions a complete topology for a user session.
    ///
    /// Creates the network, the controller and the managed nodes, prepares
    /// SSH access on each node and writes the inventory into the
    /// controller. On any failure, resources created so far are destroyed
    /// before the error is returned.
    pub async fn create(
        &self,
        user_id: &str,
        tag: &str,
    ) -> Result<ProvisionedTopology, SandboxError> {
        let topology = topology_name(user_id, tag);

        match self.provision(user_id, tag, &topology).await {
            Ok(controller_id) => {
                info!(
                    topology = %topology,
                    nodes = self.config.managed_nodes,
                    "Provisioned sandbox topology"
                );
                Ok(ProvisionedTopology {
                    controller_id,
                    topology_name: topology,
                })
            }
            Err(e) => {
                warn!(topology = %topology, error = %e, "Provisioning failed, rolling back");
                self.destroy(&topology).await;
                Err(SandboxError::ProvisionFailed {
                    topology,
                    reason: e.to_string(),
                })
            }
        }
    }

    /// Runs the individual provisioning steps. Rollback is the caller's job.
    async fn provision(
        &self,
        user_id: &str,
        tag: &str,
        topology: &str,
    ) -> Result<String, SandboxError> {
        let network = network_name(user_id, tag);

        let network_labels = HashMap::from([
            (LABEL_APP.to_string(), APP_LABEL.to_string()),
            (LABEL_USER.to_string(), user_id.to_string()),
            (LABEL_PARENT.to_string(), topology.to_string()),
        ]);
        self.docker.create_network(&network, network_labels).await?;

        let controller_caps =
            ResourceCaps::controller(self.config.memory_limit_bytes, self.config.cpu_fraction);
        let controller_labels = HashMap::from([
            (LABEL_APP.to_string(), APP_LABEL.to_string()),
            (LABEL_USER.to_string(), user_id.to_string()),
            (LABEL_TYPE.to_string(), TYPE_CONTROL_NODE.to_string()),
        ]);
        let controller_spec = ContainerSpec::new(
            topology,
            self.config.controller_image.as_str(),
            controller_caps,
        )
        .with_working_dir(ANSIBLE_DIR)
        .with_network(network.as_str())
        .with_labels(controller_labels);
        let controller_id = self.docker.run_container(controller_spec).await?;

        let mut nodes = Vec::with_capacity(self.config.managed_nodes);
        for index in 1..=self.config.managed_nodes {
            let name = node_name(topology, index);
            let labels = HashMap::from([
                (LABEL_APP.to_string(), APP_LABEL.to_string()),
                (LABEL_USER.to_string(), user_id.to_string()),
                (LABEL_TYPE.to_string(), TYPE_MANAGED_NODE.to_string()),
                (LABEL_PARENT.to_string(), topology.to_string()),
            ]);
            let spec = ContainerSpec::new(
                name.as_str(),
                self.config.node_image.as_str(),
                ResourceCaps::node(self.config.node_memory_limit_bytes),
            )
            .with_network(network.as_str())
            .with_labels(labels);

            let id = self.docker.run_container(spec).await?;
            nodes.push((id, name));
        }

        tokio::time::sleep(STARTUP_GRACE).await;

        for (id, name) in &nodes {
            for command in NODE_SETUP_COMMANDS {
                let result = self
                    .docker
                    .exec_command(id, &["sh", "-c", command])
                    .await?;
                if result.exit_code != 0 {
                    debug!(
                        node = %name,
                        command,
                        exit_code = result.exit_code,
                        "Node setup command returned non-zero"
                    );
                }
            }
        }

        let inventory = build_inventory(nodes.iter().map(|(_, name)| name.as_str()));
        self.docker
            .upload_file(&controller_id, ANSIBLE_DIR, "inventory.ini", inventory.as_bytes())
            .await?;

        Ok(controller_id)
    }

    /// Destroys every resource belonging to a topology.
    ///
    /// Stops and removes all containers whose name begins with the topology
    /// name, then removes the associated network. Failures on individual
    /// resources are logged and the teardown continues; the return value
    /// reports whether everything went cleanly. Not-found resources count
    /// as success, so destroying twice is a no-op.
    pub async fn destroy(&self, topology: &str) -> bool {
        let mut clean = true;

        let containers = match self
            .docker
            .list_containers_by_label(&format!("{LABEL_APP}={APP_LABEL}"))
            .await
        {
            Ok(containers) => containers,
            Err(e) => {
                warn!(topology = %topology, error = %e, "Failed to enumerate containers");
                return false;
            }
        };

        for container in containers
            .iter()
            .filter(|c| c.name.starts_with(topology))
        {
            if let Err(e) = self.docker.stop_container(&container.name).await {
                warn!(container = %container.name, error = %e, "Failed to stop container");
                clean = false;
            }
            if let Err(e) = self.docker.remove_container(&container.name).await {
                warn!(container = %container.name, error = %e, "Failed to remove container");
                clean = false;
            }
        }

        match self
            .docker
            .list_networks_by_label(&format!("{LABEL_PARENT}={topology}"))
            .await
        {
            Ok(networks) => {
                for network in networks {
                    if let Err(e) = self.docker.remove_network(&network).await {
                        warn!(network = %network, error = %e, "Failed to remove network");
                        clean = false;
                    }
                }
            }
            Err(e) => {
                warn!(topology = %topology, error = %e, "Failed to enumerate networks");
                clean = false;
            }
        }

        if clean {
            info!(topology = %topology, "Destroyed sandbox topology");
        }
        clean
    }

    /// Stops and removes every container carrying the application label.
    ///
    /// Administrative cleanup path; relies purely on labels so it works
    /// after a restart with an empty registry.
    ///
    /// # Returns
    ///
    /// The number of containers removed.
    pub async fn reap_all_labelled(&self) -> Result<usize, SandboxError> {
        let containers = self
            .docker
            .list_containers_by_label(&format!("{LABEL_APP}={APP_LABEL}"))
            .await?;

        let mut removed = 0;
        for container in &containers {
            if let Err(e) = self.docker.stop_container(&container.name).await {
                warn!(container = %container.name, error = %e, "Failed to stop container");
                continue;
            }
            if let Err(e) = self.docker.remove_container(&container.name).await {
                warn!(container = %container.name, error = %e, "Failed to remove container");
                continue;
            }
            removed += 1;
        }

        match self
            .docker
            .list_networks_by_label(&format!("{LABEL_APP}={APP_LABEL}"))
            .await
        {
            Ok(networks) => {
                for network in networks {
                    if let Err(e) = self.docker.remove_network(&network).await {
                        warn!(network = %network, error = %e, "Failed to remove network");
                    }
                }
            }
            Err(e) => warn!(error = %e, "Failed to enumerate networks"),
        }

        info!(removed, "Reaped labelled sandbox containers");
        Ok(removed)
    }
}

/// Renders the INI inventory enumerating the managed nodes.
fn build_inventory<'a>(nodes: impl Iterator<Item = &'a str>) -> String {
    let mut inventory = String::from("[managed_nodes]\n");
    for node in nodes {
        inventory.push_str(&format!(
            "{node} ansible_connection=ssh ansible_user=ansible ansible_password=ansible\n"
        ));
    }
    inventory
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_naming_scheme() {
        assert_eq!(topology_name("42", "ab12cd34"), "ansibox_42_ab12cd34");
        assert_eq!(network_name("42", "ab12cd34"), "ansibox_net_42_ab12cd34");
        assert_eq!(node_name("ansibox_42_ab12cd34", 1), "ansibox_42_ab12cd34_node1");
        assert_eq!(node_name("ansibox_42_ab12cd34", 2), "ansibox_42_ab12cd34_node2");
    }

    #[test]
    fn test_topology_names_unique_per_session() {
        let a = topology_name("42", "aaaa");
        let b = topology_name("42", "bbbb");
        let c = topology_name("43", "aaaa");
        assert_ne!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_build_inventory() {
        let nodes = ["ansibox_42_t_node1", "ansibox_42_t_node2"];
        let inventory = build_inventory(nodes.iter().copied());

        assert!(inventory.starts_with("[managed_nodes]\n"));
        assert_eq!(inventory.matches("ansible_connection=ssh").count(), 2);
        assert!(inventory.contains("ansibox_42_t_node1 ansible_connection=ssh"));
        assert!(inventory.contains("ansible_user=ansible"));
        assert!(inventory.contains("ansible_password=ansible"));
        assert!(inventory.ends_with('\n'));
    }

    #[test]
    fn test_node_setup_covers_ssh_and_python() {
        let joined = NODE_SETUP_COMMANDS.join("\n");
        assert!(joined.contains("openssh-server"));
        assert!(joined.contains("python3"));
        assert!(joined.contains("NOPASSWD"));
    }
}
