use std::io::{self, BufRead, Write};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tracing::debug;

use tanod_core::forms::{FormError, LoginForm, PasswordUpdateForm, RegisterForm};
use tanod_core::models::SignUpOutcome;
use tanod_core::{AppContext, AuthState, Navigator, RouteId};

/// Prints each root replacement instead of switching screens.
struct PrintNavigator;

impl Navigator for PrintNavigator {
    fn replace_root(&self, route: RouteId) {
        println!("-> {route}");
    }
}

fn prompt(label: &str) -> Result<String> {
    print!("{label}");
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin()
        .lock()
        .read_line(&mut line)
        .context("Failed to read input")?;
    Ok(line.trim().to_string())
}

fn confirm(question: &str, default: bool) -> Result<bool> {
    let hint = if default { "[Y/n]" } else { "[y/N]" };
    let answer = prompt(&format!("{question} {hint} "))?;
    Ok(match answer.to_lowercase().as_str() {
        "" => default,
        "y" | "yes" => true,
        _ => false,
    })
}

fn read_secret(label: &str) -> Result<String> {
    rpassword::prompt_password(label).context("Failed to read password")
}

fn form_failure(e: FormError) -> anyhow::Error {
    debug!(error = %e, "Form submission failed");
    anyhow::anyhow!("{}", e.user_message())
}

fn describe(state: &AuthState) -> String {
    match state {
        AuthState::Authenticated(session) => format!(
            "Signed in as {} <{}> (token expires in {} min)",
            session.user.display_name(),
            session.user.email,
            session.minutes_until_expiry()
        ),
        other => other.label().to_string(),
    }
}

pub async fn boot(ctx: &AppContext) -> Result<()> {
    let mut gate = ctx.start_gate(Arc::new(PrintNavigator));
    gate.wait_ready().await;
    println!("{}", describe(&ctx.store.current()));
    println!("Following auth changes, Ctrl-C to quit.");
    tokio::signal::ctrl_c().await?;
    gate.shutdown();
    Ok(())
}

pub async fn whoami(ctx: &AppContext) -> Result<()> {
    let state = ctx.store.resolve().await;
    println!("{}", describe(&state));
    Ok(())
}

pub async fn login(ctx: &AppContext, email: Option<&str>) -> Result<()> {
    let mut form = LoginForm::mount(&ctx.vault).await;

    if let Some(email) = email {
        if email != form.identifier {
            form.secret.clear();
        }
        form.identifier = email.to_string();
    }
    if form.identifier.is_empty() {
        form.identifier = prompt("Email: ")?;
    }

    let reuse = !form.secret.is_empty()
        && confirm(&format!("Use stored password for {}?", form.identifier), true)?;
    if !reuse {
        form.secret = read_secret("Password: ")?;
    }
    form.remember_me = confirm("Remember me on this device?", form.remember_me)?;

    let session = form
        .submit(&ctx.store, &ctx.vault)
        .await
        .map_err(form_failure)?;
    println!("Welcome, {}!", session.user.display_name());
    Ok(())
}

pub async fn register(ctx: &AppContext, first: &str, last: &str, email: &str) -> Result<()> {
    let mut form = RegisterForm {
        first_name: first.to_string(),
        last_name: last.to_string(),
        identifier: email.to_string(),
        secret: read_secret("Choose a password: ")?,
    };

    match form.submit(&ctx.store).await.map_err(form_failure)? {
        SignUpOutcome::SignedIn(session) => {
            println!("Registration successful! Signed in as {}.", session.user.display_name())
        }
        SignUpOutcome::PendingConfirmation { user } => {
            println!("Registration successful! Check {} to confirm your account.", user.email)
        }
    }
    Ok(())
}

pub async fn logout(ctx: &AppContext) -> Result<()> {
    ctx.store.resolve().await;
    ctx.store.logout().await;
    println!("Signed out.");
    Ok(())
}

pub async fn reset_password(ctx: &AppContext, email: &str) -> Result<()> {
    ctx.identity()
        .request_password_reset(email)
        .await
        .map_err(|e| anyhow::anyhow!("{}", e.user_message()))?;
    println!("If an account exists for {email}, a reset link is on its way.");
    Ok(())
}

pub async fn update_password(ctx: &AppContext) -> Result<()> {
    if !ctx.store.resolve().await.is_authenticated() {
        bail!("Sign in first.");
    }
    let mut form = PasswordUpdateForm {
        password: read_secret("New password: ")?,
        confirmation: read_secret("Confirm new password: ")?,
    };
    form.submit(ctx.identity()).await.map_err(form_failure)?;
    println!("Password updated successfully.");
    Ok(())
}

pub async fn forget(ctx: &AppContext) -> Result<()> {
    ctx.vault.clear().await?;
    println!("Remembered credentials cleared.");
    Ok(())
}
