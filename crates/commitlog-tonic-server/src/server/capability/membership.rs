use super::ServerLister;
use commitlog_tonic_core::{Result, proto::Server};

/// Fixed membership: this node as leader, plus any configured peers.
#[derive(Debug, Clone)]
pub struct StaticMembership {
    servers: Vec<Server>,
}

impl StaticMembership {
    pub fn new(node_id: &str, rpc_addr: &str, peers: &[(String, String)]) -> Self {
        let local = Server {
            id: node_id.to_string(),
            rpc_addr: rpc_addr.to_string(),
            is_leader: true,
        };
        let followers = peers.iter().map(|(id, addr)| Server {
            id: id.clone(),
            rpc_addr: addr.clone(),
            is_leader: false,
        });
        Self {
            servers: core::iter::once(local).chain(followers).collect(),
        }
    }
}

#[tonic::async_trait]
impl ServerLister for StaticMembership {
    async fn servers(&self) -> Result<Vec<Server>> {
        Ok(self.servers.clone())
    }
}
