use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::mpsc::Receiver;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info};
use webchat_core::models::{Attachment, ChatSettings, Message, generate_id};
use webchat_core::services::{AudioRecorder, LoginClient, attachment_codec, reveal};
use webchat_core::{ChatSession, SessionError};

use crate::logging::Notice;
use crate::render;

const HELP: &str = "\
Type a message and press enter to send it.

/attach <path>       add a file to the next message
/detach              drop pending attachments
/record              start recording a voice message
/stop                stop recording and attach it
/show                print the conversation
/delete <n>          delete message number n
/download <n> [dir]  save the attachments of message n
/clear               delete this conversation
/history             list stored chats
/switch <chat id>    make another stored chat active
/new                 start a new chat
/export [dir]        write this chat to a JSON file
/import <path>       import an exported chat and switch to it
/webhook <url>       set the webhook URL
/name <name>         set the chat name
/typing <on|off>     toggle the typing animation
/login <user> <pw>   sign in and use your personal webhook
/logout              forget the signed-in user
/settings            show current settings
/help                show this help
/quit                exit";

const REVEAL_STEP: usize = 3;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Send(String),
    Attach(PathBuf),
    Detach,
    Record,
    Stop,
    Show,
    Delete(usize),
    Download { index: usize, dir: Option<PathBuf> },
    Clear,
    History,
    Switch(String),
    NewChat,
    Export(Option<PathBuf>),
    Import(PathBuf),
    Webhook(String),
    Name(String),
    Typing(bool),
    Login { username: String, password: String },
    Logout,
    Settings,
    Help,
    Quit,
}

fn required<'a>(arg: &'a str, usage: &str) -> Result<&'a str, String> {
    if arg.is_empty() {
        Err(format!("usage: {}", usage))
    } else {
        Ok(arg)
    }
}

fn message_number(arg: &str, usage: &str) -> Result<usize, String> {
    required(arg, usage)?
        .parse::<usize>()
        .ok()
        .filter(|n| *n > 0)
        .ok_or_else(|| format!("usage: {}", usage))
}

/// Parse one input line. Lines not starting with `/` are messages.
pub fn parse(line: &str) -> Result<Command, String> {
    let line = line.trim();
    let Some(command) = line.strip_prefix('/') else {
        return Ok(Command::Send(line.to_string()));
    };

    let (name, arg) = command
        .split_once(char::is_whitespace)
        .map(|(n, a)| (n, a.trim()))
        .unwrap_or((command, ""));

    match name {
        "attach" => Ok(Command::Attach(PathBuf::from(required(arg, "/attach <path>")?))),
        "detach" => Ok(Command::Detach),
        "record" => Ok(Command::Record),
        "stop" => Ok(Command::Stop),
        "show" => Ok(Command::Show),
        "delete" => Ok(Command::Delete(message_number(arg, "/delete <n>")?)),
        "download" => {
            let (index, dir) = arg
                .split_once(char::is_whitespace)
                .map(|(i, d)| (i, Some(PathBuf::from(d.trim()))))
                .unwrap_or((arg, None));
            Ok(Command::Download {
                index: message_number(index, "/download <n> [dir]")?,
                dir,
            })
        }
        "clear" => Ok(Command::Clear),
        "history" => Ok(Command::History),
        "switch" => Ok(Command::Switch(required(arg, "/switch <chat id>")?.to_string())),
        "new" => Ok(Command::NewChat),
        "export" => Ok(Command::Export((!arg.is_empty()).then(|| PathBuf::from(arg)))),
        "import" => Ok(Command::Import(PathBuf::from(required(arg, "/import <path>")?))),
        "webhook" => Ok(Command::Webhook(required(arg, "/webhook <url>")?.to_string())),
        "name" => Ok(Command::Name(required(arg, "/name <name>")?.to_string())),
        "typing" => match arg {
            "on" => Ok(Command::Typing(true)),
            "off" => Ok(Command::Typing(false)),
            _ => Err("usage: /typing <on|off>".to_string()),
        },
        "login" => match arg.split_whitespace().collect::<Vec<_>>().as_slice() {
            [username, password] => Ok(Command::Login {
                username: username.to_string(),
                password: password.to_string(),
            }),
            _ => Err("usage: /login <user> <password>".to_string()),
        },
        "logout" => Ok(Command::Logout),
        "settings" => Ok(Command::Settings),
        "help" | "?" => Ok(Command::Help),
        "quit" | "exit" => Ok(Command::Quit),
        other => Err(format!("Unknown command '/{}'. Type /help for a list.", other)),
    }
}

/// Target of a downloaded attachment. Only the final component of the stored
/// name is used, so imported names cannot point outside `dir`.
fn download_path(dir: &Path, name: &str) -> Result<PathBuf> {
    let file_name = Path::new(name)
        .file_name()
        .with_context(|| format!("Attachment name '{}' is not a file name", name))?;
    Ok(dir.join(file_name))
}

/// Line-oriented front end standing in for the chat widget.
pub struct Repl {
    session: Arc<ChatSession>,
    recorder: AudioRecorder,
    login: LoginClient,
    login_url: Option<String>,
    notices: Receiver<Notice>,
    pending: Vec<Attachment>,
}

impl Repl {
    pub fn new(
        session: Arc<ChatSession>,
        recorder: AudioRecorder,
        login: LoginClient,
        login_url: Option<String>,
        notices: Receiver<Notice>,
    ) -> Self {
        Self {
            session,
            recorder,
            login,
            login_url,
            notices,
            pending: Vec::new(),
        }
    }

    pub async fn run(mut self) -> Result<()> {
        let settings = self.session.settings();
        println!("{} (type /help for commands)", settings.chat_name);
        if !settings.has_webhook() {
            println!("No webhook URL configured yet. Use /webhook <url> or /login.");
        }
        self.show();

        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            self.prompt()?;
            let Some(line) = lines.next_line().await.context("Failed to read input")? else {
                break;
            };
            if line.trim().is_empty() {
                continue;
            }

            let keep_going = match parse(&line) {
                Ok(command) => self.execute(command).await,
                Err(usage) => {
                    println!("{}", usage);
                    true
                }
            };
            self.drain_notices();
            if !keep_going {
                break;
            }
        }

        if self.recorder.is_recording() {
            // Releases the capture device.
            let _ = self.recorder.stop().await;
        }
        info!("Session ended");
        Ok(())
    }

    fn prompt(&self) -> Result<()> {
        let mut prompt = String::new();
        if self.recorder.is_recording() {
            prompt.push_str("(rec) ");
        }
        if !self.pending.is_empty() {
            prompt.push_str(&format!("[{} attached] ", self.pending.len()));
        }
        prompt.push_str("> ");
        print!("{}", prompt);
        std::io::stdout().flush().context("Failed to write prompt")
    }

    fn drain_notices(&self) {
        while let Ok(notice) = self.notices.try_recv() {
            println!("! {}", notice);
        }
    }

    /// Returns false when the user asked to quit.
    async fn execute(&mut self, command: Command) -> bool {
        if !matches!(command, Command::Login { .. }) {
            debug!(command = ?command, "Executing command");
        }
        let result = match command {
            Command::Quit => return false,
            Command::Help => {
                println!("{}", HELP);
                Ok(())
            }
            Command::Send(text) => self.send(text).await,
            Command::Attach(path) => self.attach(&path).await,
            Command::Detach => {
                println!("Dropped {} pending attachment(s).", self.pending.len());
                self.pending.clear();
                Ok(())
            }
            Command::Record => self.start_recording().await,
            Command::Stop => self.stop_recording().await,
            Command::Show => {
                self.show();
                Ok(())
            }
            Command::Delete(index) => self.delete(index).await,
            Command::Download { index, dir } => self.download(index, dir).await,
            Command::Clear => self
                .session
                .clear()
                .await
                .map(|_| println!("Conversation cleared."))
                .map_err(Into::into),
            Command::History => self.history().await,
            Command::Switch(chat_id) => {
                self.update_settings(|s| s.chat_id = chat_id).await
            }
            Command::NewChat => self.update_settings(|s| s.chat_id = generate_id()).await,
            Command::Export(dir) => self.export(dir).await,
            Command::Import(path) => self.import(&path).await,
            Command::Webhook(url) => self.update_settings(|s| s.webhook_url = url).await,
            Command::Name(name) => self.update_settings(|s| s.chat_name = name).await,
            Command::Typing(enabled) => {
                self.update_settings(|s| s.typing_animation = enabled).await
            }
            Command::Login { username, password } => self.sign_in(&username, &password).await,
            Command::Logout => self.sign_out().await,
            Command::Settings => {
                println!("{}", render::settings(&self.session.settings()));
                Ok(())
            }
        };

        if let Err(e) = result {
            println!("{:#}", e);
        }
        true
    }

    async fn send(&mut self, text: String) -> Result<()> {
        let attachments = std::mem::take(&mut self.pending);
        let outcome = match self.session.send_message(&text, attachments.clone()).await {
            Ok(outcome) => outcome,
            Err(e @ (SessionError::Busy | SessionError::EmptyMessage)) => {
                // Nothing was sent; keep what the user attached.
                self.pending = attachments;
                return Err(e.into());
            }
            Err(e) => return Err(e.into()),
        };

        let index = self.session.messages().len();
        self.print_reply(index, &outcome.reply).await;
        Ok(())
    }

    async fn print_reply(&self, index: usize, reply: &Message) {
        if !reply.is_typing {
            println!("{}", render::message(index, reply));
            return;
        }

        print!("{} ", render::message_header(index, reply));
        let mut printed = 0;
        reveal::play(
            &reply.content,
            REVEAL_STEP,
            reveal::DEFAULT_FRAME_INTERVAL,
            |frame| {
                print!("{}", &frame[printed..]);
                let _ = std::io::stdout().flush();
                printed = frame.len();
            },
        )
        .await;
        println!();
        self.session.finish_reveal(&reply.id);
    }

    async fn attach(&mut self, path: &Path) -> Result<()> {
        let attachment = attachment_codec::materialize_path(path).await?;
        println!("Attached {}", render::attachment_line(&attachment));
        self.pending.push(attachment);
        Ok(())
    }

    async fn start_recording(&mut self) -> Result<()> {
        self.recorder.start().await?;
        println!("Recording... type /stop to finish.");
        Ok(())
    }

    async fn stop_recording(&mut self) -> Result<()> {
        match self.recorder.stop().await? {
            Some(attachment) => {
                println!(
                    "Recorded {}s: {}",
                    self.recorder.elapsed_seconds(),
                    render::attachment_line(&attachment)
                );
                self.pending.push(attachment);
            }
            None => println!("Not recording."),
        }
        Ok(())
    }

    fn show(&self) {
        for (i, message) in self.session.messages().iter().enumerate() {
            println!("{}", render::message(i + 1, message));
        }
    }

    fn message_at(&self, index: usize) -> Result<Message> {
        self.session
            .messages()
            .into_iter()
            .nth(index - 1)
            .with_context(|| format!("There is no message {}", index))
    }

    async fn delete(&self, index: usize) -> Result<()> {
        let message = self.message_at(index)?;
        self.session.delete_message(&message.id).await?;
        println!("Deleted message {}.", index);
        Ok(())
    }

    async fn download(&self, index: usize, dir: Option<PathBuf>) -> Result<()> {
        let message = self.message_at(index)?;
        if message.attachments.is_empty() {
            println!("Message {} has no attachments.", index);
            return Ok(());
        }

        let dir = dir.unwrap_or_else(|| PathBuf::from("."));
        for attachment in &message.attachments {
            let path = download_path(&dir, &attachment.name)?;
            let data = attachment_codec::bytes(attachment)?;
            tokio::fs::write(&path, &data)
                .await
                .with_context(|| format!("Failed to write {}", path.display()))?;
            println!("Saved {}", path.display());
        }
        Ok(())
    }

    async fn history(&self) -> Result<()> {
        let chats = self.session.store().list().await?;
        if chats.is_empty() {
            println!("No stored chats.");
        }
        let active = self.session.chat_id();
        for summary in &chats {
            println!("{}", render::chat_summary(summary, &active));
        }
        Ok(())
    }

    async fn export(&self, dir: Option<PathBuf>) -> Result<()> {
        let exported = self.session.export_chat().await?;
        let path = dir
            .unwrap_or_else(|| PathBuf::from("."))
            .join(&exported.file_name);
        tokio::fs::write(&path, &exported.bytes)
            .await
            .with_context(|| format!("Failed to write {}", path.display()))?;
        println!("Exported to {}", path.display());
        Ok(())
    }

    async fn import(&self, path: &Path) -> Result<()> {
        let raw = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let record = self.session.import_chat(&raw).await?;
        println!("Imported \"{}\" ({} messages).", record.name, record.messages.len());
        self.show();
        Ok(())
    }

    async fn update_settings(&self, change: impl FnOnce(&mut ChatSettings)) -> Result<()> {
        let mut settings = self.session.settings();
        let previous_chat = settings.chat_id.clone();
        change(&mut settings);
        self.session.update_settings(settings).await?;

        if self.session.chat_id() != previous_chat {
            println!("Now chatting in {}.", self.session.chat_id());
            self.show();
        } else {
            println!("Settings saved.");
        }
        Ok(())
    }

    async fn sign_in(&self, username: &str, password: &str) -> Result<()> {
        let base = self
            .login_url
            .as_deref()
            .context("No login server configured (use --login-url)")?;
        let login = self.login.login(base, username, password).await?;
        self.session.store().remember_login(&login).await?;

        let webhook_url = login.webhook_url.clone();
        self.update_settings(|s| s.webhook_url = webhook_url).await?;
        println!("Signed in as {}.", login.name);
        Ok(())
    }

    async fn sign_out(&self) -> Result<()> {
        self.session.store().forget_login().await?;
        println!("Signed out.");
        Ok(())
    }
}
