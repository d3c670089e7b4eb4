use super::{DeviceProfile, SessionBackend, TgError};
use crate::prelude::*;
use crate::proxy::Proxy;
use crate::{err, Result};
use async_trait::async_trait;
use grammers_client::{Client, InitParams};
use grammers_tl_types as tl;
use std::sync::Arc;

/// Handle of the bot's mini app resolved for the account
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct BotPeer {
    pub(crate) user_id: i64,
    pub(crate) access_hash: i64,
}

/// Channel the account has joined
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ChannelPeer {
    pub(crate) channel_id: i64,
    pub(crate) access_hash: i64,
}

/// Channel reference from a `t.me` link
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ChannelLink {
    Username(String),
    Invite(String),
}

impl ChannelLink {
    /// Returns `None` for the links that must not be joined or aren't
    /// channel links at all.
    pub(crate) fn parse(link: &str) -> Option<Self> {
        let path = link
            .trim()
            .trim_start_matches("https://")
            .trim_start_matches("http://")
            .strip_prefix("t.me/")?
            .trim_end_matches('/');

        if path.is_empty() || path == "money" {
            return None;
        }

        if let Some(hash) = path.strip_prefix('+') {
            return Some(Self::Invite(hash.to_owned()));
        }

        Some(Self::Username(path.to_owned()))
    }
}

/// The slice of the Telegram client API the account worker needs.
#[async_trait]
pub(crate) trait TgSession: Send {
    async fn connect(&mut self) -> Result;

    /// Disconnecting a session that isn't connected is a no-op.
    async fn disconnect(&mut self);

    async fn resolve_bot(&mut self, username: &str) -> Result<BotPeer>;

    /// Requests the web view of the bot's mini app and returns its URL.
    async fn request_app_web_view(
        &mut self,
        bot: BotPeer,
        short_name: &str,
        start_param: Option<&str>,
    ) -> Result<String>;

    /// Returns the joined channel. It may be unknown when the account has
    /// already been a member of the channel behind an invite link.
    async fn join_channel(&mut self, channel: &ChannelLink) -> Result<Option<ChannelPeer>>;

    /// Disables the notifications from the channel until the unix timestamp.
    async fn mute_channel(&mut self, channel: ChannelPeer, until: i32) -> Result;
}

/// Telegram session backed by the `grammers` client.
pub(crate) struct GrammersSession {
    account: String,
    api_id: i32,
    api_hash: String,
    device: DeviceProfile,
    proxy: Option<Proxy>,
    backend: Arc<dyn SessionBackend>,
    client: Option<Client>,
}

impl GrammersSession {
    pub(crate) fn new(
        account: impl Into<String>,
        api_id: i32,
        api_hash: impl Into<String>,
        device: DeviceProfile,
        proxy: Option<Proxy>,
        backend: Arc<dyn SessionBackend>,
    ) -> Self {
        let account = account.into();

        let proxy = proxy.filter(|proxy| {
            let supported = proxy.scheme().starts_with("socks5");
            if !supported {
                warn!(
                    account = %account,
                    proxy = %proxy.redacted(),
                    "Telegram connection supports only SOCKS5 proxies, connecting directly"
                );
            }
            supported
        });

        Self {
            account,
            api_id,
            api_hash: api_hash.into(),
            device,
            proxy,
            backend,
            client: None,
        }
    }

    fn client(&self) -> Result<&Client> {
        self.client
            .as_ref()
            .ok_or_else(|| err!(TgError::NotConnected))
    }

    fn init_params(&self) -> InitParams {
        InitParams {
            device_model: self.device.device_model.clone(),
            system_version: self.device.system_version.clone(),
            app_version: self.device.app_version.clone(),
            system_lang_code: self.device.system_lang_code.clone(),
            lang_code: self.device.lang_code.clone(),
            // Flood waits are handled by the caller, they must not block
            // the session silently while the lock is held
            flood_sleep_threshold: 0,
            proxy_url: self.proxy.as_ref().map(ToString::to_string),
            ..Default::default()
        }
    }
}

#[async_trait]
impl TgSession for GrammersSession {
    async fn connect(&mut self) -> Result {
        if self.client.is_some() {
            return Ok(());
        }

        let session = self.backend.load().await?;

        let client = Client::connect(grammers_client::Config {
            session,
            api_id: self.api_id,
            api_hash: self.api_hash.clone(),
            params: self.init_params(),
        })
        .await
        .map_err(|source| err!(TgError::Connect { source }))?;

        let authorized = client
            .is_authorized()
            .await
            .map_err(invocation_err)?;

        if !authorized {
            return Err(err!(TgError::Unauthorized {
                reason: "the session is not logged in".to_owned(),
            }));
        }

        debug!(
            account = %self.account,
            backend = %self.backend.kind(),
            "Connected to Telegram"
        );

        self.client = Some(client);

        Ok(())
    }

    async fn disconnect(&mut self) {
        let Some(client) = self.client.take() else {
            return;
        };

        if let Err(err) = self.backend.save(client.session()).await {
            warn!(
                account = %self.account,
                err = tracing_err(&err),
                "Failed to save the session"
            );
        }

        // Dropping the last handle closes the connection
        drop(client);

        debug!(account = %self.account, "Disconnected from Telegram");
    }

    async fn resolve_bot(&mut self, username: &str) -> Result<BotPeer> {
        let chat = self
            .client()?
            .resolve_username(username)
            .await
            .map_err(invocation_err)?
            .ok_or_else(|| err!(TgError::UsernameNotFound { username }))?;

        let packed = chat.pack();

        Ok(BotPeer {
            user_id: packed.id,
            access_hash: packed.access_hash.unwrap_or(0),
        })
    }

    async fn request_app_web_view(
        &mut self,
        bot: BotPeer,
        short_name: &str,
        start_param: Option<&str>,
    ) -> Result<String> {
        let request = tl::functions::messages::RequestAppWebView {
            write_allowed: true,
            compact: false,
            peer: tl::types::InputPeerUser {
                user_id: bot.user_id,
                access_hash: bot.access_hash,
            }
            .into(),
            app: tl::types::InputBotAppShortName {
                bot_id: tl::types::InputUser {
                    user_id: bot.user_id,
                    access_hash: bot.access_hash,
                }
                .into(),
                short_name: short_name.to_owned(),
            }
            .into(),
            start_param: start_param.map(ToOwned::to_owned),
            theme_params: None,
            platform: "android".to_owned(),
        };

        let result = self
            .client()?
            .invoke(&request)
            .await
            .map_err(invocation_err)?;

        match result {
            tl::enums::WebViewResult::Url(result) => Ok(result.url),
        }
    }

    async fn join_channel(&mut self, channel: &ChannelLink) -> Result<Option<ChannelPeer>> {
        let client = self.client()?;

        let (result, known) = match channel {
            ChannelLink::Invite(hash) => {
                let request = tl::functions::messages::ImportChatInvite { hash: hash.clone() };
                (client.invoke(&request).await.map(joined_channel), None)
            }
            ChannelLink::Username(username) => {
                let chat = client
                    .resolve_username(username)
                    .await
                    .map_err(invocation_err)?
                    .ok_or_else(|| err!(TgError::UsernameNotFound { username }))?
                    .pack();

                let peer = ChannelPeer {
                    channel_id: chat.id,
                    access_hash: chat.access_hash.unwrap_or(0),
                };

                (client.join_chat(chat).await.map(|_| Some(peer)), Some(peer))
            }
        };

        match result {
            Ok(peer) => Ok(peer),
            Err(grammers_mtsender::InvocationError::Rpc(rpc))
                if rpc.name == "USER_ALREADY_PARTICIPANT" =>
            {
                debug!(account = %self.account, ?channel, "Already subscribed to the channel");
                Ok(known)
            }
            Err(err) => Err(invocation_err(err)),
        }
    }

    async fn mute_channel(&mut self, channel: ChannelPeer, until: i32) -> Result {
        let request = tl::functions::account::UpdateNotifySettings {
            peer: tl::types::InputNotifyPeer {
                peer: tl::types::InputPeerChannel {
                    channel_id: channel.channel_id,
                    access_hash: channel.access_hash,
                }
                .into(),
            }
            .into(),
            settings: tl::types::InputPeerNotifySettings {
                show_previews: None,
                silent: None,
                mute_until: Some(until),
                sound: None,
                stories_muted: None,
                stories_hide_sender: None,
                stories_sound: None,
            }
            .into(),
        };

        self.client()?
            .invoke(&request)
            .await
            .map_err(invocation_err)?;

        Ok(())
    }
}

/// Finds the channel in the updates sent in reply to the invite import.
fn joined_channel(updates: tl::enums::Updates) -> Option<ChannelPeer> {
    let chats = match updates {
        tl::enums::Updates::Updates(updates) => updates.chats,
        tl::enums::Updates::Combined(updates) => updates.chats,
        _ => return None,
    };

    chats.into_iter().find_map(|chat| match chat {
        tl::enums::Chat::Channel(channel) => Some(ChannelPeer {
            channel_id: channel.id,
            access_hash: channel.access_hash.unwrap_or(0),
        }),
        _ => None,
    })
}

fn invocation_err(err: grammers_mtsender::InvocationError) -> crate::Error {
    TgError::from(err).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_links() {
        assert_eq!(
            ChannelLink::parse("https://t.me/dogiators"),
            Some(ChannelLink::Username("dogiators".to_owned()))
        );
        assert_eq!(
            ChannelLink::parse("https://t.me/+AbCdEf123"),
            Some(ChannelLink::Invite("AbCdEf123".to_owned()))
        );
        assert_eq!(ChannelLink::parse("https://t.me/money"), None);
        assert_eq!(ChannelLink::parse("https://x.com/dogiators"), None);
    }
}
