use std::path::PathBuf;

use clap::Parser;

use crate::filter::FilterOptions;
use crate::range::RangeRequest;
use crate::source::ListenScope;

/// Pipe Telegram messages through filters and cleanup profiles into
/// console, HTTP and document-store sinks.
#[derive(Parser, Debug, Clone)]
#[command(name = "telebridge")]
#[command(version, about, long_about = None)]
#[command(after_help = "EXAMPLES:
    telebridge --chat mychannel --limit 50
    telebridge --chat @group --from-id 100 --to-id 200 --inclusive
    telebridge --chat mychannel --forward --limit 0 --pattern 'release'
    telebridge --bot-token 123:abc --listen-private --profile minimal")]
pub struct Cli {
    /// Path to the TOML config file
    #[arg(short, long, default_value = "config.toml")]
    pub config: PathBuf,

    /// Chat to fetch history from (username or id)
    #[arg(long, value_name = "CHAT")]
    pub chat: Option<String>,

    /// Message id to start from
    #[arg(long, value_name = "ID")]
    pub from_id: Option<i64>,

    /// Message id to stop at
    #[arg(long, value_name = "ID")]
    pub to_id: Option<i64>,

    /// Include the boundary ids themselves
    #[arg(long)]
    pub inclusive: bool,

    /// Maximum number of messages (0 = no limit)
    #[arg(short, long, value_name = "N")]
    pub limit: Option<u32>,

    /// Read oldest to newest
    #[arg(long, conflicts_with = "backward")]
    pub forward: bool,

    /// Read newest to oldest
    #[arg(long)]
    pub backward: bool,

    /// Cleanup profile name
    #[arg(short, long, default_value = "default")]
    pub profile: String,

    /// Listen for live events in one chat
    #[arg(long, value_name = "CHAT", conflicts_with_all = ["listen_private", "listen_all"])]
    pub listen: Option<String>,

    /// Listen for live events in private chats only
    #[arg(long, conflicts_with = "listen_all")]
    pub listen_private: bool,

    /// Listen for live events in every chat the bot sees
    #[arg(long)]
    pub listen_all: bool,

    /// Bot token for live mode (overrides [telegram] bot_token)
    #[arg(long, value_name = "TOKEN")]
    pub bot_token: Option<String>,

    /// Serve health checks even if [health] is disabled
    #[arg(long)]
    pub health: bool,

    /// Verbose logging
    #[arg(short, long)]
    pub debug: bool,

    /// Only messages received by the account
    #[arg(long)]
    pub incoming_only: bool,

    /// Only messages sent by the account
    #[arg(long)]
    pub outgoing_only: bool,

    /// Only messages from this user id
    #[arg(long, value_name = "USER_ID")]
    pub from_user: Option<String>,

    /// Case-insensitive regex the message text must match
    #[arg(long, value_name = "REGEX")]
    pub pattern: Option<String>,

    /// Only messages with media
    #[arg(long)]
    pub has_media: bool,

    /// Only forwarded messages
    #[arg(long)]
    pub forwarded_only: bool,

    /// Only replies
    #[arg(long)]
    pub replies_only: bool,

    /// Only messages with reactions
    #[arg(long)]
    pub has_reactions: bool,
}

impl Cli {
    pub fn range_request(&self) -> RangeRequest {
        RangeRequest {
            from_id: self.from_id,
            to_id: self.to_id,
            forward: self.forward,
            backward: self.backward,
            inclusive: self.inclusive,
            limit: self.limit,
        }
    }

    /// Conflicting direction flags are left for `MessageFilter::new` to reject.
    pub fn filter_options(&self) -> FilterOptions {
        FilterOptions {
            incoming_only: self.incoming_only,
            outgoing_only: self.outgoing_only,
            from_user: self.from_user.clone(),
            pattern: self.pattern.clone(),
            has_media: self.has_media,
            forwarded_only: self.forwarded_only,
            replies_only: self.replies_only,
            has_reactions: self.has_reactions,
        }
    }

    /// Live scope requested on the command line. With a bot token but neither
    /// a listen flag nor `--chat`, every chat is reported.
    pub fn listen_scope(&self, has_token: bool) -> Option<ListenScope> {
        if let Some(chat) = &self.listen {
            Some(ListenScope::Chat(chat.clone()))
        } else if self.listen_private {
            Some(ListenScope::Private)
        } else if self.listen_all || (has_token && self.chat.is_none()) {
            Some(ListenScope::All)
        } else {
            None
        }
    }
}
