use deepchat_lib::commands::{self, Command, HELP};
use deepchat_lib::models::{History, UserStats};
use deepchat_lib::services::config_service;
use deepchat_lib::services::middleware::ErrorClassifier;
use deepchat_lib::{spawn_health_monitor, ApiClient, ChatSession, SyncCache};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("deepchat: {}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<(), String> {
    let config = config_service::get_effective_config().map_err(|e| e.to_string())?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    tracing::info!(base_url = %config.api_base_url, authenticated = config.init_data.is_some(), "Starting chat client");

    let client = ApiClient::from_config(&config, ErrorClassifier::new()).map_err(|e| e.to_string())?;
    let cache = Arc::new(SyncCache::new(Arc::new(client)));
    let session = ChatSession::new(cache.clone());
    let monitor = spawn_health_monitor(cache);

    match session.load().await {
        Ok((history, stats)) => {
            print_stats(&stats);
            print_history(&history);
        }
        Err(e) => println!("Could not load conversation: {}", e),
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = commands::next_input(&mut lines).await {
        let Some(command) = Command::parse(&line) else {
            continue;
        };

        match command {
            Command::Send(text) => {
                if !session.can_send() {
                    println!("Daily limit reached, come back tomorrow.");
                    continue;
                }
                match commands::send_chat_message(&session, text).await {
                    Ok(response) => println!("assistant> {}", response.message),
                    Err(e) => println!("! {}", e),
                }
                session.observe();
                if let Ok(stats) = commands::get_user_stats(&session).await {
                    print_stats(&stats);
                }
            }
            Command::History => match commands::get_chat_history(&session).await {
                Ok(history) => print_history(&history),
                Err(e) => println!("! {}", e),
            },
            Command::Stats => match commands::get_user_stats(&session).await {
                Ok(stats) => print_stats(&stats),
                Err(e) => println!("! {}", e),
            },
            Command::Health => match commands::check_health(&session).await {
                Ok(health) => println!("{}: {}", health.service, health.status),
                Err(e) => println!("! {}", e),
            },
            Command::Focus => {
                let keys = commands::focus_regained(&session);
                println!("Refreshing: {:?}", keys);
            }
            Command::Config => match commands::get_config() {
                Ok(config) => println!("{:#?}", config),
                Err(e) => println!("! {}", e),
            },
            Command::SetBaseUrl(url) => match commands::set_base_url(url) {
                Ok(()) => println!("Saved. Restart to use the new base URL."),
                Err(e) => println!("! {}", e),
            },
            Command::Help => println!("{}", HELP),
            Command::Quit => break,
        }
    }

    monitor.abort();
    Ok(())
}

fn print_stats(stats: &UserStats) {
    println!(
        "Messages today: {}/{}  remaining: {}",
        stats.messages_today, stats.daily_limit, stats.messages_remaining
    );
}

fn print_history(history: &History) {
    match history {
        History::Empty => println!("No messages yet. Say hello!"),
        History::Messages(messages) => {
            for message in messages {
                let who = match message.role {
                    deepchat_lib::models::Role::User => "you",
                    deepchat_lib::models::Role::Assistant => "assistant",
                };
                println!("{}> {}", who, message.content);
            }
        }
    }
}
