use log::{debug, info, warn};
use oauth_core::{AuthorizationServer, CredentialStore, TokenStore};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Background task removing expired codes and tokens at a fixed period.
///
/// The task stops when the reaper is dropped.
#[derive(Debug)]
pub struct Reaper {
    shutdown_token: CancellationToken,
}

impl Reaper {
    /// Spawns the purge loop. A zero period disables it and returns `None`.
    pub fn start<S, C>(server: Arc<AuthorizationServer<S, C>>, period: Duration) -> Option<Self>
    where
        S: TokenStore + 'static,
        C: CredentialStore + 'static,
    {
        if period.is_zero() {
            info!("Expired token purge disabled");
            return None;
        }

        let shutdown_token = CancellationToken::new();
        let token = shutdown_token.clone();
        tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately
            ticker.tick().await;
            info!("Purging expired tokens every {:?}", period);

            loop {
                tokio::select! {
                    _ = token.cancelled() => {
                        info!("Expired token purge shutting down");
                        break;
                    }
                    _ = ticker.tick() => {}
                }

                match server.purge_expired().await {
                    Ok(0) => {}
                    Ok(purged) => debug!("Purged {} expired rows", purged),
                    Err(e) => warn!("Failed to purge expired tokens: {}", e),
                }
            }
        });

        Some(Self { shutdown_token })
    }

    pub fn stop(&self) {
        self.shutdown_token.cancel();
    }
}

impl Drop for Reaper {
    fn drop(&mut self) {
        self.shutdown_token.cancel();
    }
}
