//! Command execution

use std::io::Read;
use std::path::Path;

use anyhow::{Context, Result};
use log::{debug, info, warn};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::cli::{Args, Command};
use crate::collaborators::LocalState;
use crate::config::{parse_duration, ConfigManager};
use crate::directives::Directives;
use crate::dispatch::{IntakeOutcome, IntakeRequest};
use crate::display::{self, ColourManager};
use crate::model::SubscriptionRequest;
use super::initialization::{create_colour_manager, load_engine_config, Engine};

/// Run the selected subcommand against the state file
pub async fn run_command(args: &Args, config: &ConfigManager) -> Result<()> {
    let colours = create_colour_manager(args, config);
    let engine_config = load_engine_config(config)?;

    if let Command::Parse { client_state } = &args.command {
        let directives = Directives::parse(client_state);
        if args.json {
            print_json(&directives.to_json())?;
        } else {
            print!("{}", display::render_directives(&directives, &engine_config.default_queue, &colours));
        }
        return Ok(());
    }

    let state = LocalState::load(&args.state)?;
    let engine = Engine::build(state, engine_config)?;

    match &args.command {
        Command::Parse { .. } => {}
        Command::Renew { threshold } => {
            let threshold = match threshold {
                Some(value) => chrono::Duration::from_std(parse_duration(value)?).context("threshold out of range")?,
                None => engine.manager.settings().renewal_threshold,
            };
            let report = engine.manager.renewer().renew_expiring(threshold).await;
            output(args, &report, |r| display::render_renewal(r, &colours))?;
        }
        Command::Reconcile => {
            let report = engine.manager.reconciler().sync().await;
            output(args, &report, |r| display::render_sync(r, &colours))?;
        }
        Command::Maintain { once } => {
            if *once {
                let report = engine.manager.run_maintenance().await;
                output(args, &report, |r| display::render_maintenance(r, &colours))?;
            } else {
                run_periodic(&engine, &args.state).await?;
            }
        }
        Command::Dispatch { payload, validation_token } => {
            let body = read_body(payload.as_deref())?;
            let request = IntakeRequest { validation_token: validation_token.clone(), body };
            dispatch(args, &engine, request, &colours).await?;
        }
        Command::Subscribe { resource, client_state, change_type, notification_url } => {
            let request = SubscriptionRequest {
                resource_path: resource.clone(),
                change_type: change_type.clone(),
                notification_url: notification_url.clone().unwrap_or_default(),
                expires_at: chrono::Utc::now(),
                client_state: (!client_state.is_empty()).then(|| client_state.clone()),
            };
            let created = engine.manager.create_subscription(request).await?;
            if args.json {
                print_json(&created)?;
            } else {
                println!(
                    "{} {} on {} until {}",
                    colours.success("Subscribed"),
                    colours.highlight(&created.subscription.id),
                    created.subscription.resource_path,
                    created.subscription.expires_at.to_rfc3339(),
                );
                if created.record.is_none() {
                    println!("  {}", colours.warning("tracking record not written; next reconcile will create it"));
                }
            }
        }
        Command::Unsubscribe { id } => {
            let changed = engine.manager.delete_subscription(id).await?;
            if args.json {
                print_json(&serde_json::json!({ "id": id, "recordMarkedDeleted": changed }))?;
            } else {
                println!("{} {}", colours.success("Unsubscribed"), colours.highlight(id));
            }
        }
    }

    engine.snapshot().save(&args.state)
}

/// Maintenance loop until Ctrl-C, saving state after every pass
async fn run_periodic(engine: &Engine, state_path: &Path) -> Result<()> {
    let interval = engine.config.maintenance_interval;
    info!("Running maintenance every {}s; Ctrl-C to stop", interval.as_secs());

    let cancel = CancellationToken::new();
    let handle = engine.manager.clone().spawn_periodic(interval, cancel.clone());

    let mut ticker = tokio::time::interval(interval);
    ticker.tick().await;
    loop {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                if let Err(e) = result {
                    warn!("Failed to listen for Ctrl-C: {}", e);
                }
                break;
            }
            _ = ticker.tick() => {
                if let Err(e) = engine.snapshot().save(state_path) {
                    warn!("Failed to save state: {:#}", e);
                }
            }
        }
    }

    cancel.cancel();
    handle.await.context("Maintenance task failed")?;
    Ok(())
}

async fn dispatch(args: &Args, engine: &Engine, request: IntakeRequest, colours: &ColourManager) -> Result<()> {
    if args.json {
        let response = engine.dispatcher.respond(request).await;
        debug!("Intake response status {}", response.status);
        println!("{}", response.body);
        if response.status >= 400 {
            anyhow::bail!("Request rejected with status {}", response.status);
        }
        return Ok(());
    }

    match engine.dispatcher.handle(request).await? {
        IntakeOutcome::Validated(token) => println!("{}", token),
        IntakeOutcome::Batch(report) => print!("{}", display::render_batch(&report, colours)),
    }
    Ok(())
}

fn read_body(payload: Option<&Path>) -> Result<Option<String>> {
    let body = match payload {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read payload file: {}", path.display()))?,
        None => {
            let mut buffer = String::new();
            std::io::stdin().read_to_string(&mut buffer).context("Failed to read payload from stdin")?;
            buffer
        }
    };
    Ok((!body.trim().is_empty()).then_some(body))
}

fn output<T: Serialize>(args: &Args, report: &T, render: impl Fn(&T) -> String) -> Result<()> {
    if args.json {
        print_json(report)
    } else {
        print!("{}", render(report));
        Ok(())
    }
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value).context("Failed to serialize output")?);
    Ok(())
}
