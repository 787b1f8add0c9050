//! The demo login workflow.
//!
//! ```text
//! Credentials --submit--> Verify --accepted--> SecondFactor --completed--> Welcome --> finish
//!                           |                      |
//!                           +--denied--> Rejected <-+ outcome:Failed
//!                                           |
//!                                           +--done--> outcome:Rejected
//! ```
//!
//! Input is non-interactive: the credentials and code come from the
//! command line. Controllers hand every trigger to the UI gateway, so each
//! screen is shown before the simulated user (or the worker thread
//! checking the password) moves the workflow on.

use crate::console::ScreenView;
use crate::services::{Identity, LoginService, MessageEndpoint};
use deck_core::error::WorkflowError;
use deck_core::utils::EngineConfig;
use deck_workflow::{
    Answer, Controller, EdgeKey, EdgeTarget, Question, Step, StepContext, Trigger, UiContext,
    Workflow, WorkflowBuilder, WorkflowDefinition,
};
use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Outcome of the login workflow when sign-in failed
pub const OUTCOME_REJECTED: &str = "Rejected";

/// Outcome of the second-factor workflow when the code was wrong
pub const OUTCOME_FAILED: &str = "Failed";

/// What the user typed
#[derive(Debug, Clone)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
    pub code: String,
}

/// Simulated latencies
#[derive(Debug, Clone, Copy)]
pub struct Timing {
    pub verify: Duration,
    pub welcome: Duration,
}

/// State shared by every step of one login run.
#[derive(Debug, Default)]
pub struct Session {
    identity: RefCell<Option<Identity>>,
    failure: RefCell<Option<String>>,
}

impl Session {
    pub fn identity(&self) -> Option<Identity> {
        self.identity.borrow().clone()
    }

    pub fn failure(&self) -> Option<String> {
        self.failure.borrow().clone()
    }

    fn sign_in(&self, identity: Identity) {
        *self.identity.borrow_mut() = Some(identity);
    }

    fn fail(&self, reason: String) {
        *self.failure.borrow_mut() = Some(reason);
    }
}

/// Trigger pair for a background check, parked on the UI thread.
struct Verdict {
    accept: Trigger,
    reject: Trigger,
    session: Rc<Session>,
}

impl Verdict {
    fn settle(&self, result: Result<Option<Identity>, String>) {
        let trigger = match result {
            Ok(identity) => {
                if let Some(identity) = identity {
                    self.session.sign_in(identity);
                }
                &self.accept
            }
            Err(reason) => {
                self.session.fail(reason);
                &self.reject
            }
        };
        if let Err(err) = trigger.fire() {
            log::warn!("Dropping result of background check: {}", err);
        }
    }
}

/// Fire `trigger` on the UI thread after `delay`.
fn fire_later(ui: &UiContext, trigger: Trigger, delay: Duration) {
    let key = ui.stash(trigger);
    let gateway = ui.gateway();
    let job = move |ui: &UiContext| {
        if let Some(trigger) = ui.remove(key) {
            if let Err(err) = trigger.fire() {
                log::warn!("Deferred trigger not taken: {}", err);
            }
        }
    };

    if delay.is_zero() {
        if let Err(err) = gateway.post(job) {
            log::warn!("Could not schedule trigger: {}", err);
        }
        return;
    }
    thread::spawn(move || {
        thread::sleep(delay);
        if let Err(err) = gateway.post(job) {
            log::warn!("Could not schedule trigger: {}", err);
        }
    });
}

struct CredentialsController {
    submit: Trigger,
}

impl Controller for CredentialsController {
    fn initialize(&self, ctx: &mut StepContext<'_>) -> Result<(), WorkflowError> {
        // The form is "submitted" as soon as the UI thread is free.
        let ui = ctx.require::<UiContext>()?;
        fire_later(&ui, self.submit.clone(), Duration::ZERO);
        Ok(())
    }
}

struct VerifyController {
    accepted: Trigger,
    denied: Trigger,
}

impl Controller for VerifyController {
    fn initialize(&self, ctx: &mut StepContext<'_>) -> Result<(), WorkflowError> {
        let ui = ctx.require::<UiContext>()?;
        let request = ctx.require::<LoginRequest>()?;
        let service = Arc::clone(&*ctx.require::<Arc<dyn LoginService>>()?);
        let delay = ctx.require::<Timing>()?.verify;

        let key = ui.stash(Verdict {
            accept: self.accepted.clone(),
            reject: self.denied.clone(),
            session: ctx.require::<Session>()?,
        });
        let parked = ui.clone();
        ctx.defer("pending verdict", move || {
            parked.remove(key);
            Ok(())
        });

        let gateway = ui.gateway();
        let username = request.username.clone();
        let password = request.password.clone();
        thread::Builder::new()
            .name("login-check".to_string())
            .spawn(move || {
                thread::sleep(delay);
                let result = service
                    .authenticate(&username, &password)
                    .map(Some)
                    .map_err(|failure| failure.to_string());
                let posted = gateway.post(move |ui| {
                    if let Some(verdict) = ui.get(key) {
                        verdict.settle(result);
                    }
                });
                if let Err(err) = posted {
                    log::warn!("Login result for '{}' lost: {}", username, err);
                }
            })
            .map_err(|err| WorkflowError::Initialization {
                step: ctx.step().name.clone(),
                message: err.to_string(),
            })?;
        Ok(())
    }
}

struct CodeController {
    confirmed: Trigger,
    rejected: Trigger,
}

impl Controller for CodeController {
    fn initialize(&self, ctx: &mut StepContext<'_>) -> Result<(), WorkflowError> {
        let ui = ctx.require::<UiContext>()?;
        let session = ctx.require::<Session>()?;
        let identity = session.identity().ok_or_else(|| {
            WorkflowError::Resolution("second factor requested without a signed-in user".into())
        })?;
        let code = ctx.require::<LoginRequest>()?.code.clone();
        let service = Arc::clone(&*ctx.require::<Arc<dyn LoginService>>()?);

        let key = ui.stash(Verdict {
            accept: self.confirmed.clone(),
            reject: self.rejected.clone(),
            session,
        });
        let posted = ui.gateway().post(move |ui| {
            if let Some(verdict) = ui.remove(key) {
                let result = service
                    .verify_code(&identity, &code)
                    .map(|()| None)
                    .map_err(|failure| failure.to_string());
                verdict.settle(result);
            }
        });
        posted.map_err(|err| WorkflowError::Initialization {
            step: ctx.step().name.clone(),
            message: err.to_string(),
        })
    }
}

struct WelcomeController {
    done: Trigger,
}

impl Controller for WelcomeController {
    fn initialize(&self, ctx: &mut StepContext<'_>) -> Result<(), WorkflowError> {
        let session = ctx.require::<Session>()?;
        let endpoint = ctx.require::<Arc<dyn MessageEndpoint>>()?;
        if let Some(identity) = session.identity() {
            endpoint.publish(
                "session.started",
                serde_json::json!({
                    "user": identity.username,
                    "session": identity.session.to_string(),
                }),
            );
        }

        let ui = ctx.require::<UiContext>()?;
        fire_later(&ui, self.done.clone(), ctx.require::<Timing>()?.welcome);
        Ok(())
    }
}

struct RejectedController {
    done: Trigger,
}

impl Controller for RejectedController {
    fn initialize(&self, ctx: &mut StepContext<'_>) -> Result<(), WorkflowError> {
        let reason = ctx
            .require::<Session>()?
            .failure()
            .unwrap_or_else(|| "unknown reason".to_string());
        let question = Question::new("Sign-in failed", reason)
            .with_choice("Try again")
            .with_choice("Quit");
        if ctx.runner().ask_question(&question) == Answer::Choice(0) {
            return ctx.navigate("Retry");
        }

        let ui = ctx.require::<UiContext>()?;
        fire_later(&ui, self.done.clone(), Duration::ZERO);
        Ok(())
    }
}

/// View factory for a `ScreenView` whose lines are computed per activation.
fn screen(
    title: &'static str,
    lines: fn(&StepContext<'_>) -> Vec<String>,
) -> impl Fn(&mut StepContext<'_>) -> Result<ScreenView, WorkflowError> {
    move |ctx| {
        Ok(lines(ctx)
            .into_iter()
            .fold(ScreenView::new(title), |view, line| view.line(line)))
    }
}

fn username(ctx: &StepContext<'_>) -> String {
    ctx.resolve::<LoginRequest>()
        .map(|request| request.username.clone())
        .unwrap_or_default()
}

fn display_name(ctx: &StepContext<'_>) -> String {
    ctx.resolve::<Session>()
        .and_then(|session| session.identity())
        .map(|identity| identity.display_name)
        .unwrap_or_default()
}

/// The second-factor sub-workflow: one code screen.
pub fn second_factor_definition(
    config: &EngineConfig,
) -> Result<WorkflowDefinition, WorkflowError> {
    let code = Step::new("Code")
        .with_controller(|ctx| {
            Ok(CodeController {
                confirmed: ctx.trigger("confirmed"),
                rejected: ctx.trigger("rejected"),
            })
        })
        .with_view(screen("Verification code", |ctx| {
            vec![format!("code sent to {}", display_name(ctx))]
        }))
        .finish_on(EdgeKey::property("confirmed", |c: &CodeController| &c.confirmed))
        .with_edge(
            EdgeKey::property("rejected", |c: &CodeController| &c.rejected),
            EdgeTarget::Outcome(OUTCOME_FAILED.to_string()),
        );

    WorkflowBuilder::new("second-factor")
        .with_config(config.clone())
        .add_step(code)?
        .build()
}

/// The login workflow.
pub fn login_definition(config: &EngineConfig) -> Result<WorkflowDefinition, WorkflowError> {
    let welcome = Step::new("Welcome")
        .with_controller(|ctx| {
            Ok(WelcomeController {
                done: ctx.trigger("done"),
            })
        })
        .with_view(screen("Welcome", |ctx| {
            vec![format!("Signed in as {}", display_name(ctx))]
        }))
        .finish_on(EdgeKey::property("done", |c: &WelcomeController| &c.done));

    let rejected = Step::new("Rejected")
        .with_controller(|ctx| {
            Ok(RejectedController {
                done: ctx.trigger("done"),
            })
        })
        .with_view(screen("Sign-in failed", |ctx| {
            vec![ctx
                .resolve::<Session>()
                .and_then(|session| session.failure())
                .unwrap_or_default()]
        }))
        .with_edge(
            EdgeKey::property("done", |c: &RejectedController| &c.done),
            EdgeTarget::Outcome(OUTCOME_REJECTED.to_string()),
        );

    let engine = config.clone();
    let second_factor = Step::new("SecondFactor")
        .with_nested(move |ctx| {
            let child = Workflow::new(second_factor_definition(&engine)?);
            child.register_rc(ctx.require::<UiContext>()?)?;
            child.register_rc(ctx.require::<LoginRequest>()?)?;
            child.register_rc(ctx.require::<Session>()?)?;
            child.register_rc(ctx.require::<Arc<dyn LoginService>>()?)?;
            Ok(child)
        })
        .on(EdgeKey::Completed, welcome.id)
        .on(EdgeKey::outcome(OUTCOME_FAILED), rejected.id);

    let verify = Step::new("Verify")
        .with_controller(|ctx| {
            Ok(VerifyController {
                accepted: ctx.trigger("accepted"),
                denied: ctx.trigger("denied"),
            })
        })
        .with_view(screen("Verifying", |ctx| {
            vec![format!("checking credentials for {}", username(ctx))]
        }))
        .on(
            EdgeKey::property("accepted", |c: &VerifyController| &c.accepted),
            second_factor.id,
        )
        .on(
            EdgeKey::property("denied", |c: &VerifyController| &c.denied),
            rejected.id,
        );

    let credentials = Step::new("Credentials")
        .with_controller(|ctx| {
            Ok(CredentialsController {
                submit: ctx.trigger("submit"),
            })
        })
        .with_view(screen("Sign in", |ctx| {
            let masked = ctx
                .resolve::<LoginRequest>()
                .map(|request| "*".repeat(request.password.chars().count()))
                .unwrap_or_default();
            vec![format!("user: {}", username(ctx)), format!("password: {}", masked)]
        }))
        .on(
            EdgeKey::property("submit", |c: &CredentialsController| &c.submit),
            verify.id,
        );

    let (credentials_id, rejected_id) = (credentials.id, rejected.id);
    WorkflowBuilder::new("login")
        .with_config(config.clone())
        .add_step(credentials)?
        .add_step(verify)?
        .add_step(second_factor)?
        .add_step(welcome)?
        .add_step(rejected)?
        .connect(
            rejected_id,
            EdgeKey::named("Retry"),
            EdgeTarget::Step(credentials_id),
        )?
        .start_at(credentials_id)
        .build()
}
