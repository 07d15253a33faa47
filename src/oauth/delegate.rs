use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use log::info;
use tokio::sync::Mutex;
use yup_oauth2::authenticator_delegate::InstalledFlowDelegate;

use super::receiver::LoopbackReceiver;
use crate::error::OAuthError;

/// Lets the installed-flow authenticator receive the authorization code
/// through a `LoopbackReceiver` instead of asking the user to paste it.
pub struct LoopbackFlowDelegate {
    receiver: Arc<Mutex<LoopbackReceiver>>,
    redirect_uri: String,
}

impl LoopbackFlowDelegate {
    /// Starts the receiver so the redirect URI is known before the
    /// authorization URL is built.
    pub async fn start(receiver: Arc<Mutex<LoopbackReceiver>>) -> Result<Self, OAuthError> {
        let redirect_uri = receiver.lock().await.start().await?;
        Ok(LoopbackFlowDelegate {
            receiver,
            redirect_uri,
        })
    }

    async fn authorize(&self, url: &str) -> Result<String, OAuthError> {
        let mut receiver = self.receiver.lock().await;
        // Restarts on the same port when a later refresh needs the browser again.
        receiver.start().await?;

        info!("🌐 Browser authorization required");
        println!("Please open the following URL in your browser to sign in:\n\n  {}\n", url);

        let outcome = receiver.wait_for_code().await;
        let stopped = receiver.stop().await;
        let code = outcome?;
        stopped?;
        Ok(code)
    }
}

impl InstalledFlowDelegate for LoopbackFlowDelegate {
    fn redirect_uri(&self) -> Option<&str> {
        Some(&self.redirect_uri)
    }

    fn present_user_url<'a>(
        &'a self,
        url: &'a str,
        _need_code: bool,
    ) -> Pin<Box<dyn Future<Output = Result<String, String>> + Send + 'a>> {
        Box::pin(async move { self.authorize(url).await.map_err(|e| e.to_string()) })
    }
}
