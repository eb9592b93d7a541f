use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};

use workchat::{
    Attachment, ChatListItem, ChatUpdate, ConnectionState, ConversationId, ConversationUpdate,
    Session, UserId, Workchat, WorkchatConfig, WorkchatError,
};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Line-oriented chat client for trying out a workchat backend
#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// REST base URL. Falls back to WORKCHAT_API_URL when omitted
    #[clap(long, value_name = "URL", requires = "socket_url")]
    api_url: Option<String>,

    /// Chat socket URL. Falls back to WORKCHAT_SOCKET_URL when omitted
    #[clap(long, value_name = "URL", requires = "api_url")]
    socket_url: Option<String>,

    /// Directory for application logs
    #[clap(long, value_name = "PATH")]
    logs_dir: Option<PathBuf>,

    /// Id of the signed-in user
    #[clap(long, required = true)]
    user_id: String,

    /// Bearer token issued by the auth service
    #[clap(long, required = true)]
    token: String,

    /// Conversation to open on start
    #[clap(long, conflicts_with = "with")]
    conversation: Option<String>,

    /// Start (or resume) a personal chat with this user on start
    #[clap(long)]
    with: Option<String>,
}

fn build_config(args: &Args) -> Result<WorkchatConfig, WorkchatError> {
    match (&args.api_url, &args.socket_url) {
        (Some(api_url), Some(socket_url)) => {
            let logs_dir = args
                .logs_dir
                .clone()
                .unwrap_or_else(|| std::env::temp_dir().join("workchat").join("logs"));
            Ok(WorkchatConfig::new(api_url, socket_url, &logs_dir))
        }
        _ => {
            let mut config = WorkchatConfig::from_env()?;
            if let Some(logs_dir) = &args.logs_dir {
                config.logs_dir = logs_dir.clone();
            }
            Ok(config)
        }
    }
}

fn print_update(update: &ChatUpdate) {
    match update {
        ChatUpdate::Conversation {
            update: ConversationUpdate::Message(update),
            ..
        } => {
            let message = &update.message;
            println!(
                "[{}] {} ({:?}): {}",
                message.created_at.format("%H:%M"),
                message.sender_id,
                update.trigger,
                message.content.as_deref().unwrap_or("")
            );
        }
        ChatUpdate::Conversation {
            update: ConversationUpdate::HistoryReplaced(messages),
            ..
        } => {
            for message in messages {
                println!(
                    "[{}] {}: {}",
                    message.created_at.format("%H:%M"),
                    message.sender_id,
                    message.content.as_deref().unwrap_or("")
                );
            }
        }
        ChatUpdate::Conversation {
            update: ConversationUpdate::HistoryPrepended(messages),
            ..
        } => println!("-- {} older messages loaded --", messages.len()),
        ChatUpdate::Typing {
            user_id,
            is_typing: true,
            ..
        } => println!("{} is typing...", user_id),
        ChatUpdate::ConnectionChanged(state) => println!("-- connection: {:?} --", state),
        ChatUpdate::Notice(notice) => {
            println!("!! {} failed ({:?}): {}", notice.action, notice.category, notice.message)
        }
        _ => {}
    }
}

async fn print_chat_list(workchat: &Workchat) {
    for item in workchat.chat_list(None).await {
        match item {
            ChatListItem::Conversation(summary) => println!(
                "  {} {}{} ({} unread)",
                summary.id,
                summary.name,
                if summary.online { " *" } else { "" },
                summary.unread_count
            ),
            ChatListItem::PotentialChat { user, online } => println!(
                "  + {} {}{}",
                user.id,
                user.display_name(),
                if online { " *" } else { "" }
            ),
        }
    }
}

async fn wait_until_connected(workchat: &Workchat) -> bool {
    let mut state = workchat.watch_connection();
    tokio::time::timeout(
        CONNECT_TIMEOUT,
        state.wait_for(|s| *s == ConnectionState::Connected),
    )
    .await
    .is_ok_and(|result| result.is_ok())
}

/// Handles one input line. Returns `false` when the user asked to quit.
async fn handle_line(workchat: &Workchat, line: &str) -> bool {
    let (command, rest) = line.split_once(' ').unwrap_or((line, ""));
    let rest = rest.trim();
    // Failures are already printed through the notice stream
    let _ = match command {
        "/quit" => return false,
        "/list" => {
            print_chat_list(workchat).await;
            Ok(())
        }
        "/open" => workchat.open_conversation(&ConversationId::from(rest)).await,
        "/chat" => match workchat.start_chat(&UserId::from(rest)).await {
            Ok(conversation) => workchat.open_conversation(&conversation.id).await,
            Err(e) => Err(e),
        },
        "/older" => workchat
            .load_older_messages(rest.parse().unwrap_or(2))
            .await
            .map(|_| ()),
        "/file" => match Attachment::from_path(rest.as_ref(), workchat.max_upload_bytes()).await {
            Ok(attachment) => workchat.send_attachment(attachment, None).await,
            Err(e) => {
                println!("!! cannot read {}: {}", rest, e);
                Ok(())
            }
        },
        "/location" => workchat.send_location().await.map(|_| ()),
        _ => workchat.send_text(line, None).await,
    };
    true
}

#[tokio::main]
async fn main() -> Result<(), WorkchatError> {
    let args = Args::parse();
    let config = build_config(&args)?;
    let session = Session::new(args.user_id.as_str(), args.token.as_str());
    let workchat = Workchat::new(config, session).await?;

    let mut updates = workchat.subscribe();
    tokio::spawn(async move {
        while let Ok(update) = updates.recv().await {
            print_update(&update);
        }
    });

    workchat.connect().await;
    if !wait_until_connected(&workchat).await {
        tracing::warn!(
            target: "workchat::chat_console",
            "Not connected after {:?}, continuing anyway",
            CONNECT_TIMEOUT
        );
    }

    workchat.refresh_users().await?;
    workchat.refresh_conversations().await?;
    print_chat_list(&workchat).await;

    if let Some(conversation) = &args.conversation {
        workchat
            .open_conversation(&ConversationId::from(conversation.as_str()))
            .await?;
    } else if let Some(user) = &args.with {
        let conversation = workchat.start_chat(&UserId::from(user.as_str())).await?;
        workchat.open_conversation(&conversation.id).await?;
    }

    println!(
        "Commands: /list, /open <id>, /chat <user>, /older <page>, /file <path>, /location, /quit"
    );
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if !handle_line(&workchat, line).await {
            break;
        }
    }

    workchat.shutdown().await
}
