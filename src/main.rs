use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use helpnearby::config::AppConfig;
use helpnearby::context::AppContext;
use helpnearby::models::{DispatchOutcome, NewHelpRequest, NotificationPayload};
use helpnearby::services::{notify_worker, request_service, user_service};

#[derive(Parser)]
#[command(name = "helpnearby", about = "Help requests with nearby push alerts")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create a help request and alert the neighbours around it.
    CreateRequest {
        #[arg(long)]
        owner: String,
        #[arg(long)]
        title: String,
        #[arg(long, allow_hyphen_values = true)]
        lat: f64,
        #[arg(long, allow_hyphen_values = true)]
        lon: f64,
        #[arg(long)]
        description: Option<String>,
        #[arg(long)]
        category: Option<String>,
        #[arg(long)]
        reward: Option<f64>,
        #[arg(long)]
        urgency: Option<String>,
    },
    /// Re-run the nearby alert for an existing request and wait for the outcome.
    NotifyNearby {
        request_id: String,
        /// Overrides NEARBY_RADIUS_MILES.
        #[arg(long)]
        radius: Option<f64>,
    },
    /// Store the push token of a user's device.
    RegisterToken {
        #[arg(long)]
        user: String,
        #[arg(long)]
        token: String,
    },
    /// Push a notification to specific users.
    NotifyUsers {
        #[arg(long = "user", required = true)]
        users: Vec<String>,
        #[command(flatten)]
        message: MessageArgs,
    },
    /// Push a notification straight to a device token.
    NotifyToken {
        #[arg(long)]
        token: String,
        #[command(flatten)]
        message: MessageArgs,
    },
    /// Push a notification to every device subscribed to a topic.
    NotifyTopic {
        #[arg(long)]
        topic: String,
        #[command(flatten)]
        message: MessageArgs,
    },
    /// Subscribe a device token to a topic.
    Subscribe {
        #[arg(long)]
        token: String,
        #[arg(long)]
        topic: String,
    },
    /// Unsubscribe a device token from a topic.
    Unsubscribe {
        #[arg(long)]
        token: String,
        #[arg(long)]
        topic: String,
    },
}

#[derive(Args)]
struct MessageArgs {
    #[arg(long)]
    title: String,
    #[arg(long)]
    body: String,
    #[arg(long)]
    image_url: Option<String>,
    /// Extra data entries as key=value.
    #[arg(long = "data", value_parser = parse_data_entry)]
    data: Vec<(String, String)>,
}

impl MessageArgs {
    fn into_payload(self) -> Result<NotificationPayload> {
        let mut payload = NotificationPayload::new(self.title, self.body)?;
        if let Some(url) = self.image_url {
            payload = payload.with_image_url(url);
        }
        for (key, value) in self.data {
            payload = payload.with_data(key, value);
        }
        Ok(payload)
    }
}

fn report(outcome: &DispatchOutcome) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(outcome)?);
    if !outcome.success {
        bail!("{}", outcome.message);
    }
    Ok(())
}

fn parse_data_entry(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((k, v)) if !k.trim().is_empty() => Ok((k.trim().to_string(), v.to_string())),
        _ => Err(format!("expected key=value, got '{}'", raw)),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let config = AppConfig::from_env().context("loading configuration")?;
    info!(build = env!("HELPNEARBY_BUILD_ID"), "helpnearby starting");
    let ctx = AppContext::init(config).await?;

    match cli.command {
        Command::CreateRequest {
            owner,
            title,
            lat,
            lon,
            description,
            category,
            reward,
            urgency,
        } => {
            let (notifier, worker) = notify_worker::spawn_notify_worker(
                ctx.pipeline.clone(),
                ctx.config.notify_queue_capacity,
            );
            let input = NewHelpRequest {
                title,
                description,
                category,
                reward,
                latitude: lat,
                longitude: lon,
                urgency,
            };
            let request = request_service::create_help_request(
                &ctx.pool,
                &notifier,
                &owner,
                input,
                ctx.config.nearby_radius_miles,
            )
            .await?;
            println!("{}", serde_json::to_string_pretty(&request)?);

            // Let the queued alert finish before the process exits.
            drop(notifier);
            worker.await.context("notify worker panicked")?;
        }
        Command::NotifyNearby { request_id, radius } => {
            let request = request_service::load_help_request(&ctx.pool, &request_id).await?;
            let job = request_service::nearby_alert_job(
                &request,
                radius.unwrap_or(ctx.config.nearby_radius_miles),
            )?;
            let outcome = ctx.pipeline.run(&job).await?;
            println!("{}", serde_json::to_string_pretty(&outcome)?);
        }
        Command::RegisterToken { user, token } => {
            user_service::register_push_token(ctx.store.as_ref(), &user, &token).await?;
            println!("push token registered for {}", user);
        }
        Command::NotifyUsers { users, message } => {
            let payload = message.into_payload()?;
            let dispatcher = ctx.pipeline.dispatcher();
            let outcome = match users.as_slice() {
                [single] => dispatcher.dispatch_to_user(single, &payload).await,
                many => dispatcher.dispatch_to_user_ids(many, &payload).await,
            };
            report(&outcome)?;
        }
        Command::NotifyToken { token, message } => {
            let payload = message.into_payload()?;
            let outcome = ctx.pipeline.dispatcher().send_to_token(&token, &payload).await;
            report(&outcome)?;
        }
        Command::NotifyTopic { topic, message } => {
            let payload = message.into_payload()?;
            let outcome = ctx.pipeline.dispatcher().send_to_topic(&topic, &payload).await;
            report(&outcome)?;
        }
        Command::Subscribe { token, topic } => {
            let outcome = ctx.pipeline.dispatcher().subscribe_to_topic(&token, &topic).await;
            report(&outcome)?;
        }
        Command::Unsubscribe { token, topic } => {
            let outcome = ctx
                .pipeline
                .dispatcher()
                .unsubscribe_from_topic(&token, &topic)
                .await;
            report(&outcome)?;
        }
    }

    Ok(())
}
