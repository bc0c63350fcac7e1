use anyhow::Result;
use std::sync::Arc;
use tracing;
use tracing_subscriber;

use clinic_api::ApiState;
use clinic_booking::{AttendanceService, BookingService, ClinicJobHandler};
use clinic_core::{ClinicContext, Config, MessageCatalog};
use clinic_engine::demand::DemandEngine;
use clinic_notify::Notifier;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    tracing::info!("Starting clinic appointment service");

    let config = Config::from_env();
    let ctx = ClinicContext::new(config).await?;
    let repo = ctx.repo();
    repo.init_schema().await?;
    tracing::info!("Storage schema ready");

    let notifier = Notifier::new(&ctx.config.notify);
    if let Some(base_url) = &ctx.config.notify.public_base_url {
        notifier.register_webhook(base_url).await;
    }

    let engine = DemandEngine::new(repo.clone(), ctx.clock.clone());
    let catalog = MessageCatalog::new(repo.clone());

    let (scheduler, mut dispatcher) = clinic_scheduler::build(
        repo.clone(),
        ctx.clock.clone(),
        ctx.config.clinic.scheduler_workers,
        ctx.config.clinic.boot_grace_minutes,
    );

    let booking = BookingService::new(
        repo.clone(),
        ctx.clock.clone(),
        catalog,
        notifier.clone(),
        scheduler.clone(),
        engine.clone(),
        ctx.config.clinic.name.clone(),
    );
    let attendance = AttendanceService::new(
        repo,
        ctx.clock.clone(),
        engine.clone(),
        notifier.clone(),
        ctx.config.notify.public_base_url.clone(),
    );

    // Replay surviving jobs, then keep the cadence jobs armed.
    dispatcher.on_boot().await?;
    scheduler.ensure_periodic_jobs().await?;

    let handler = Arc::new(ClinicJobHandler::new(
        booking.clone(),
        attendance.clone(),
        engine.clone(),
    ));
    tokio::spawn(dispatcher.run(handler));
    tracing::info!("Scheduler dispatcher running");

    let state = ApiState {
        ctx,
        booking,
        attendance,
        engine,
        notifier,
    };
    clinic_api::run(state).await?;

    Ok(())
}
