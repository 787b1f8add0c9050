//! `deckctl login`: run the login workflow against the console runner.

use crate::config::CliConfig;
use crate::console::ConsoleRunner;
use crate::flow::{self, LoginRequest, Session, Timing, OUTCOME_REJECTED};
use crate::services::{
    InMemoryEndpoint, InMemoryLoginService, LoginService, Message, MessageEndpoint,
};
use anyhow::{bail, Context};
use clap::Args;
use deck_core::log_event;
use deck_core::utils::LogLevel;
use deck_workflow::{Completion, UiContext, UiGateway, Workflow};
use std::process::ExitCode;
use std::rc::Rc;
use std::sync::Arc;

/// Exit status when the credentials or code were refused
pub const EXIT_REJECTED: u8 = 2;

/// Arguments for the login command
#[derive(Args, Debug)]
pub struct LoginArgs {
    /// User name
    #[clap(long)]
    pub username: String,

    /// Password
    #[clap(long)]
    pub password: String,

    /// Second-factor code
    #[clap(long)]
    pub code: String,
}

/// What one login run keeps on the owner thread
struct LoginRun {
    ui: Rc<UiContext>,
    session: Rc<Session>,
    workflow: Workflow,
}

/// Register the UI context, the services and the request in a fresh
/// login workflow.
fn prepare(
    args: &LoginArgs,
    config: &CliConfig,
    gateway: &UiGateway,
) -> deck_core::Result<LoginRun> {
    let ui = Rc::new(gateway.init()?);

    let endpoint: Arc<dyn MessageEndpoint> = Arc::new(InMemoryEndpoint::new());
    endpoint.subscribe(
        "session.started",
        Arc::new(|message: &Message| {
            let user = message.payload["user"].as_str().unwrap_or("unknown");
            println!("[notice] session started for {}", user);
        }),
    );
    let service: Arc<dyn LoginService> = Arc::new(InMemoryLoginService::new(&config.users));
    let session = Rc::new(Session::default());

    let workflow = Workflow::new(flow::login_definition(&config.engine)?);
    workflow.register_rc(ui.clone())?;
    workflow.register_rc(session.clone())?;
    workflow.register(LoginRequest {
        username: args.username.clone(),
        password: args.password.clone(),
        code: args.code.clone(),
    })?;
    workflow.register(Timing {
        verify: config.verify_delay(),
        welcome: config.welcome_delay(),
    })?;
    workflow.register(service)?;
    workflow.register(endpoint)?;

    Ok(LoginRun {
        ui,
        session,
        workflow,
    })
}

/// Implementation of the login command
pub fn execute_login(args: &LoginArgs, config: &CliConfig) -> anyhow::Result<ExitCode> {
    let gateway = UiGateway::new();
    let LoginRun {
        ui,
        session,
        workflow,
    } = prepare(args, config, &gateway).context("failed to prepare the login workflow")?;

    log_event!(LogLevel::Info, "login started", user => &args.username);
    workflow
        .start(Rc::new(ConsoleRunner::new()))
        .context("login workflow failed to start")?;

    if !ui.run_until(|| !workflow.is_running(), config.timeout()) {
        if let Err(err) = workflow.end_task() {
            log::warn!("Could not terminate the login workflow: {}", err);
        }
        bail!("login did not finish within {}s", config.timeout().as_secs());
    }

    match workflow.completion() {
        Some(Completion::Finished) => {
            let name = session
                .identity()
                .map(|identity| identity.display_name)
                .unwrap_or_else(|| args.username.clone());
            println!("Signed in as {}", name);
            Ok(ExitCode::SUCCESS)
        }
        Some(Completion::Outcome(outcome)) if outcome == OUTCOME_REJECTED => {
            println!(
                "Login rejected: {}",
                session.failure().unwrap_or_else(|| "no reason given".into())
            );
            Ok(ExitCode::from(EXIT_REJECTED))
        }
        Some(Completion::Faulted(message)) => bail!("login workflow faulted: {}", message),
        other => bail!("login workflow ended unexpectedly: {:?}", other),
    }
}
