// cortex-memory/src/main.rs

#[cfg(feature = "cli")]
use clap::{Parser, Subcommand};
#[cfg(feature = "cli")]
use cortex_memory::{
    config::Config, metrics, telemetry, Bucket, MemoryService, ReactionKind,
};
#[cfg(feature = "cli")]
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
#[cfg(feature = "cli")]
use tracing::info;

#[cfg(feature = "cli")]
#[derive(Parser)]
#[command(name = "cortex-memory", version, about = "Conversational memory consolidation")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[cfg(feature = "cli")]
#[derive(Subcommand)]
enum Command {
    /// Interactive chat with memory.
    Chat {
        #[arg(long, default_value = "local-user")]
        owner: String,
        /// Resume an existing conversation instead of starting a new one.
        #[arg(long)]
        conversation: Option<String>,
    },
    /// List conversations for an owner.
    Conversations {
        #[arg(long, default_value = "local-user")]
        owner: String,
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Print the active summary of a conversation.
    Summary { conversation: String },
    /// Force a summary update now.
    Summarize { conversation: String },
    /// Print the context that would accompany a reply.
    Context {
        conversation: String,
        message: String,
        #[arg(long)]
        owner: Option<String>,
        #[arg(long)]
        history: Option<usize>,
    },
    /// List or search master memory.
    Memories {
        #[arg(long, default_value = "local-user")]
        owner: String,
        #[arg(long)]
        bucket: Option<Bucket>,
        #[arg(long)]
        query: Option<String>,
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Print Prometheus counters.
    Metrics,
}

#[cfg(feature = "cli")]
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    telemetry::init_tracing("cortex_memory=info");
    let cli = Cli::parse();

    let cfg = Config::from_env()?;
    cfg.print_config();
    let service = MemoryService::from_config(&cfg)?;

    let result = run(&service, cli.command).await;
    service.flush_side_effects().await;
    service.shutdown();
    result
}

#[cfg(feature = "cli")]
async fn run(service: &MemoryService, command: Command) -> anyhow::Result<()> {
    match command {
        Command::Chat {
            owner,
            conversation,
        } => chat(service, &owner, conversation).await?,
        Command::Conversations { owner, limit } => {
            for c in service.list_conversations(&owner, limit)? {
                println!(
                    "{}  {}  {}{}",
                    c.id,
                    c.created_at.to_rfc3339(),
                    c.title.as_deref().unwrap_or("(untitled)"),
                    if c.metadata.promoted { "  [long-running]" } else { "" }
                );
            }
        }
        Command::Summary { conversation } => match service.get_active_summary(&conversation)? {
            Some(summary) => println!("{}", summary.summary_text),
            None => println!("No active summary yet."),
        },
        Command::Summarize { conversation } => {
            let wrote = service.force_summary_update(&conversation).await?;
            println!("{}", if wrote { "Summary updated." } else { "Nothing new to summarize." });
        }
        Command::Context {
            conversation,
            message,
            owner,
            history,
        } => {
            let context = service
                .build_context_for_reply(&conversation, &message, owner.as_deref(), history)
                .await?;
            println!("{}", serde_json::to_string_pretty(&context.messages)?);
            if context.force_summary_requested {
                println!("(forced summary scheduled)");
            }
        }
        Command::Memories {
            owner,
            bucket,
            query,
            limit,
        } => match query {
            Some(query) => {
                for hit in service.search_memories(&owner, &query, bucket, limit).await? {
                    println!("{:.3}  [{}] {}", hit.distance, hit.item.bucket.as_str(), hit.item.text);
                }
            }
            None => {
                for item in service.list_memories(&owner, bucket, limit)? {
                    println!(
                        "[{}] {} (confidence {:.2}, seen {}x)",
                        item.bucket.as_str(),
                        item.text,
                        item.confidence,
                        item.reinforcement_count
                    );
                }
            }
        },
        Command::Metrics => print!("{}", metrics::gather_text()?),
    }
    Ok(())
}

#[cfg(feature = "cli")]
async fn chat(service: &MemoryService, owner: &str, conversation: Option<String>) -> anyhow::Result<()> {
    let mut conversation_id = match conversation {
        Some(id) => id,
        None => service.create_conversation(owner, None)?.id,
    };
    info!("Chatting in conversation {}", conversation_id);
    println!("Conversation {}. Commands: /new /thread /summary /like /dislike /tldr /exit", conversation_id);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();
    let mut last_assistant: Option<String> = None;

    loop {
        stdout.write_all(b"> ").await?;
        stdout.flush().await?;
        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim();

        let reaction = match line {
            "/exit" | "/quit" => break,
            "/new" => {
                conversation_id = service.create_conversation(owner, None)?.id;
                last_assistant = None;
                println!("Started conversation {}", conversation_id);
                continue;
            }
            "/thread" => {
                println!("{}", conversation_id);
                continue;
            }
            "/summary" => {
                match service.get_active_summary(&conversation_id)? {
                    Some(summary) => println!("{}", summary.summary_text),
                    None => println!("No active summary yet."),
                }
                continue;
            }
            "/like" => Some(ReactionKind::Like),
            "/dislike" => Some(ReactionKind::Dislike),
            "/tldr" => Some(ReactionKind::Summarize),
            _ => None,
        };

        if let Some(kind) = reaction {
            match &last_assistant {
                Some(event_id) => {
                    service.set_reaction(event_id, owner, Some(kind))?;
                    println!("Noted.");
                }
                None => println!("Nothing to react to yet."),
            }
            continue;
        }

        match service.reply(&conversation_id, line, Some(owner)).await {
            Ok(reply) => {
                println!("{}", reply.text);
                if reply.assistant_event_id.is_some() {
                    last_assistant = reply.assistant_event_id;
                }
            }
            Err(e) => eprintln!("error ({}): {}", e.code(), e),
        }
    }
    Ok(())
}

#[cfg(not(feature = "cli"))]
fn main() {
    println!("CLI feature not enabled. Enable with --features cli");
}
