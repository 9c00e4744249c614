use anyhow::{anyhow, Result};
use reelchat_core::models::format_timestamp;
use reelchat_core::{
    ApiClient, AppState, Attachment, ClientSettings, ConversationPoller, LogView, Message,
    MessageKind, Section, SubscriptionTier, TokenSession,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::AsyncBufRead;
use tokio::io::AsyncBufReadExt;
use tokio::task::JoinHandle;
use tracing::error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShellCommand {
    New(String),
    List,
    Open(String),
    Rename(String),
    Delete(String),
    Tokens,
    History,
    Videos,
    Attach(PathBuf),
    Plan(SubscriptionTier),
    Portal,
    Subscription,
    Health,
    Help,
    Quit,
    Say(String),
}

pub fn parse_command(line: &str) -> Result<ShellCommand, String> {
    let line = line.trim();
    let Some(rest) = line.strip_prefix('/') else {
        return Ok(ShellCommand::Say(line.to_string()));
    };
    let (name, arg) = match rest.split_once(char::is_whitespace) {
        Some((name, arg)) => (name, arg.trim()),
        None => (rest, ""),
    };
    let required = |what: &str| -> Result<String, String> {
        if arg.is_empty() {
            Err(format!("/{name} needs {what}"))
        } else {
            Ok(arg.to_string())
        }
    };
    match name {
        "new" => required("a title").map(ShellCommand::New),
        "list" => Ok(ShellCommand::List),
        "open" => required("a conversation id").map(ShellCommand::Open),
        "rename" => required("a title").map(ShellCommand::Rename),
        "delete" => required("a conversation id").map(ShellCommand::Delete),
        "tokens" => Ok(ShellCommand::Tokens),
        "history" => Ok(ShellCommand::History),
        "videos" => Ok(ShellCommand::Videos),
        "attach" => required("a file path").map(|path| ShellCommand::Attach(PathBuf::from(path))),
        "plan" => required("a plan (pro or agency)")?
            .parse()
            .map(ShellCommand::Plan),
        "portal" => Ok(ShellCommand::Portal),
        "subscription" => Ok(ShellCommand::Subscription),
        "health" => Ok(ShellCommand::Health),
        "help" => Ok(ShellCommand::Help),
        "quit" | "exit" => Ok(ShellCommand::Quit),
        other => Err(format!("unknown command /{other}, try /help")),
    }
}

const HELP: &str = "\
/new <title>        create a conversation and open it
/list               list conversations
/open <id>          open a conversation and follow it
/rename <title>     rename the open conversation
/delete <id>        delete a conversation
/tokens             show token usage
/history            show chat history
/videos             show video analysis history
/attach <path>      queue a video for the next message
/plan <pro|agency>  start a checkout for a plan
/portal             open subscription management
/subscription       show the current subscription
/health             check the service
/quit               leave
anything else       send it to the open conversation";

/// Interactive session bound to one logged-in user.
pub struct Shell {
    api: Arc<ApiClient>,
    session: Arc<TokenSession>,
    poller: Arc<ConversationPoller>,
    state: AppState,
    current: Option<String>,
    pending: Vec<Attachment>,
}

impl Shell {
    pub fn new(api: Arc<ApiClient>, settings: &ClientSettings, state: AppState) -> Self {
        let session = Arc::new(TokenSession::new(api.clone(), settings.token.clone()));
        let poller = Arc::new(ConversationPoller::new(
            api.clone(),
            settings.polling.clone(),
        ));
        Self {
            api,
            session,
            poller,
            state,
            current: None,
            pending: Vec::new(),
        }
    }

    /// Read commands until `/quit`, end of input, or the session expires.
    pub async fn run<R>(&mut self, input: R) -> Result<()>
    where
        R: AsyncBufRead + Unpin,
    {
        let mut lines = input.lines();
        let printer = spawn_printer(self.poller.clone());
        let mut session_updates = self.session.subscribe();
        let starter = {
            let session = self.session.clone();
            tokio::spawn(async move { session.start_session().await })
        };
        let mut was_authenticated = false;

        println!("Type /help for commands.");
        loop {
            tokio::select! {
                line = lines.next_line() => {
                    let Some(line) = line? else { break };
                    if line.trim().is_empty() {
                        continue;
                    }
                    match parse_command(&line) {
                        Ok(ShellCommand::Quit) => break,
                        Ok(command) => {
                            if let Err(err) = self.execute(command).await {
                                println!("error: {err}");
                            }
                        }
                        Err(message) => println!("{message}"),
                    }
                }
                changed = session_updates.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let authenticated = session_updates.borrow_and_update().is_authenticated;
                    if was_authenticated && !authenticated {
                        println!("Session expired, please log in again.");
                        break;
                    }
                    was_authenticated = authenticated;
                }
            }
        }

        starter.abort();
        printer.abort();
        self.poller.stop_polling();
        self.session.stop_session();
        Ok(())
    }

    async fn execute(&mut self, command: ShellCommand) -> Result<()> {
        match command {
            ShellCommand::New(title) => {
                let conversation = self.api.create_conversation(&title).await?;
                println!("created {} ({})", conversation.title, conversation.id);
                self.open(conversation.id);
            }
            ShellCommand::List => {
                for conversation in self.api.conversations().await? {
                    let marker = if self.current.as_deref() == Some(conversation.id.as_str()) {
                        "*"
                    } else {
                        " "
                    };
                    println!(
                        "{marker} {}  {}  {}",
                        conversation.id,
                        conversation.title,
                        format_timestamp(&conversation.created_at)
                    );
                }
            }
            ShellCommand::Open(id) => self.open(id),
            ShellCommand::Rename(title) => {
                let id = self.require_conversation()?;
                let renamed = self.api.update_conversation_title(&id, &title).await?;
                println!("renamed to {}", renamed.title);
            }
            ShellCommand::Delete(id) => {
                if self.api.delete_conversation(&id).await? {
                    println!("deleted {id}");
                    if self.current.as_deref() == Some(id.as_str()) {
                        self.poller.stop_polling();
                        self.poller.clear();
                        self.current = None;
                    }
                }
            }
            ShellCommand::Tokens => match self.session.fetch_token(false).await {
                Some(record) => {
                    println!(
                        "tokens remaining: {}  used: {}  plan: {}",
                        display_count(record.tokens_remaining()),
                        display_count(record.tokens_used()),
                        record.subscription_tier().unwrap_or("free")
                    );
                }
                None => {
                    let snapshot = self.session.snapshot();
                    println!(
                        "token information unavailable{}",
                        snapshot
                            .last_error
                            .map(|err| format!(": {err}"))
                            .unwrap_or_default()
                    );
                }
            },
            ShellCommand::History => {
                self.state.show_section(Section::History);
                for entry in self.api.chat_history().await?.history {
                    println!("[{}] {}", format_timestamp(&entry.timestamp), entry.message);
                    if !entry.response.is_empty() {
                        println!("    {}", entry.response);
                    }
                }
            }
            ShellCommand::Videos => {
                self.state.show_section(Section::Videos);
                for entry in self.api.video_analysis_history().await?.history {
                    println!(
                        "[{}] {}: {}",
                        format_timestamp(&entry.timestamp),
                        entry.video_name,
                        entry.analysis
                    );
                }
            }
            ShellCommand::Attach(path) => {
                let attachment = Attachment::from_path(&path).await?;
                println!(
                    "queued {} ({} bytes)",
                    attachment.file_name,
                    attachment.bytes.len()
                );
                self.pending.push(attachment);
            }
            ShellCommand::Plan(tier) => {
                self.state.show_section(Section::Billing);
                let checkout = self.api.create_checkout_session(tier).await?;
                println!("complete checkout at {}", checkout.url);
            }
            ShellCommand::Portal => {
                self.state.show_section(Section::Billing);
                let portal = self.api.create_portal_session().await?;
                println!("manage your subscription at {}", portal.url);
            }
            ShellCommand::Subscription => {
                self.state.show_section(Section::Billing);
                let status = self.api.current_subscription().await?;
                println!("{} ({:?})", status.tier.as_str(), status.status);
            }
            ShellCommand::Health => {
                let healthy = self.state.refresh_connection(&self.api).await;
                println!("{}", if healthy { "healthy" } else { "unreachable" });
            }
            ShellCommand::Help => println!("{HELP}"),
            ShellCommand::Say(text) => {
                let conversation = self.require_conversation()?;
                let attachments = std::mem::take(&mut self.pending);
                if let Err(err) = self
                    .poller
                    .send_message(&text, &attachments, Some(conversation.as_str()))
                    .await
                {
                    error!(%err, "send failed");
                    return Err(anyhow!(err));
                }
            }
            ShellCommand::Quit => {}
        }
        Ok(())
    }

    fn open(&mut self, id: String) {
        if self.current.as_deref() != Some(id.as_str()) {
            self.poller.clear();
        }
        self.state.show_section(Section::Chat);
        self.poller.start_polling(id.clone());
        println!("following {id}");
        self.current = Some(id);
    }

    fn require_conversation(&self) -> Result<String> {
        self.current
            .clone()
            .ok_or_else(|| anyhow!("no conversation open, use /new or /open"))
    }
}

fn display_count(value: Option<i64>) -> String {
    value
        .map(|count| count.to_string())
        .unwrap_or_else(|| "?".to_string())
}

/// Position of the printer in the log. A new clear epoch restarts it at the
/// top even if the new log is already longer than what was printed.
#[derive(Debug, Default)]
struct PrintCursor {
    epoch: u64,
    printed: usize,
}

impl PrintCursor {
    fn unseen<'a>(&mut self, view: &'a LogView) -> &'a [Message] {
        if view.epoch != self.epoch || view.messages.len() < self.printed {
            self.epoch = view.epoch;
            self.printed = 0;
        }
        let fresh = &view.messages[self.printed..];
        self.printed = view.messages.len();
        fresh
    }
}

/// Print log entries as they arrive. Local user messages are already on
/// screen, so only the service's messages are echoed.
fn spawn_printer(poller: Arc<ConversationPoller>) -> JoinHandle<()> {
    let mut revisions = poller.subscribe();
    let mut cursor = PrintCursor {
        epoch: poller.log_view().epoch,
        printed: 0,
    };
    tokio::spawn(async move {
        while revisions.changed().await.is_ok() {
            let view = poller.log_view();
            for message in cursor.unseen(&view) {
                match message.kind {
                    MessageKind::User => {}
                    MessageKind::Bot => println!("bot> {}", message.content),
                    MessageKind::Error => println!("error> {}", message.content),
                }
            }
        }
    })
}
