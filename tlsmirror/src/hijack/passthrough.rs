use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use super::{dial_error, BoxedStream, ConnectionPair, Hijacker, TargetAddr};
use crate::constants::TUNNEL_ESTABLISHED_RESPONSE;
use crate::dialer::Dialer;
use crate::error::Result;

/// Relays the raw tunnel to the destination without looking inside.
pub struct PassthroughHijacker {
    dialer: Arc<dyn Dialer>,
}

impl PassthroughHijacker {
    pub fn new(dialer: Arc<dyn Dialer>) -> Self {
        Self { dialer }
    }
}

#[async_trait]
impl Hijacker for PassthroughHijacker {
    async fn get_conns(&self, target: &TargetAddr, mut client: BoxedStream) -> Result<ConnectionPair> {
        let address = target.to_string();
        let server = self
            .dialer
            .dial("tcp", &address)
            .await
            .map_err(|e| dial_error(&address, e))?;

        client.write_all(TUNNEL_ESTABLISHED_RESPONSE).await?;
        client.flush().await?;
        debug!("Passthrough tunnel to {} established", target);

        Ok(ConnectionPair { client, server })
    }
}
