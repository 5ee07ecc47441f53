//! LynkLedger CLI - a command-line client for the LynkLedger backend.
//!
//! Logs in, keeps the session in the local cache (or the OS keychain), and
//! manages the profile, organization members and invitations. Expired
//! access tokens are refreshed transparently by the core gateway.

use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{debug, info};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use lynkledger_core::api::{Gateway, GatewayError};
use lynkledger_core::auth::{FileTokenStore, KeyringTokenStore, SessionContext, TokenStore};
use lynkledger_core::config::{Config, API_URL_ENV};
use lynkledger_core::forms::{InviteForm, LoginForm, RegisterForm};
use lynkledger_core::models::{Invitation, MemberRole, Membership, ProfileUpdate};

/// Log file prefix inside the cache directory
const LOG_FILE: &str = "lynkledger.log";

#[derive(Parser, Debug)]
#[command(name = "lynkledger", version, about = "Command-line client for LynkLedger")]
struct Cli {
    /// Backend API base URL (overrides the config file)
    #[arg(long, global = true, env = API_URL_ENV)]
    api_url: Option<String>,

    /// Keep tokens in the OS keychain instead of the cache directory
    #[arg(long, global = true)]
    keyring: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Log in with email and password
    Login {
        #[arg(long)]
        email: Option<String>,
    },
    /// Forget the stored session
    Logout,
    /// Create an organization and an account that owns it
    Register {
        #[arg(long)]
        first_name: String,
        #[arg(long)]
        last_name: String,
        #[arg(long)]
        email: String,
        #[arg(long)]
        organization: String,
    },
    /// Show the session state
    Status,
    /// Show the profile, or update it when fields are given
    Profile {
        #[arg(long)]
        first_name: Option<String>,
        #[arg(long)]
        last_name: Option<String>,
        #[arg(long)]
        email: Option<String>,
    },
    /// List the organizations you belong to
    Orgs,
    /// List members of one or more organizations
    Members {
        #[arg(required = true)]
        org_ids: Vec<i64>,
    },
    /// List invitations you can see
    Invitations,
    /// Invite someone to an organization
    Invite {
        org_id: i64,
        email: String,
        #[arg(long, default_value = "member")]
        role: MemberRole,
        #[arg(long)]
        message: Option<String>,
    },
    /// Change a member's role
    SetRole { membership_id: i64, role: MemberRole },
    /// Remove a member from their organization
    RemoveMember { membership_id: i64 },
    /// Cancel a pending invitation
    CancelInvitation { invitation_id: i64 },
    /// Show the invitation behind an invitation link token
    ShowInvitation { token: String },
    /// Accept an invitation by its link token
    AcceptInvitation { token: String },
}

/// Initialize the tracing subscriber for logging.
/// Stderr gets `RUST_LOG` (default `warn`); the daily log file gets `info`.
fn init_tracing(log_dir: Option<PathBuf>) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let stderr_layer = fmt::layer().with_writer(io::stderr).with_filter(filter);

    match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let file_layer = fmt::layer()
                .with_ansi(false)
                .with_writer(writer)
                .with_filter(EnvFilter::new("lynkledger_core=info,lynkledger=info"));
            tracing_subscriber::registry()
                .with(stderr_layer)
                .with(file_layer)
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::registry().with(stderr_layer).init();
            None
        }
    }
}

fn open_store(use_keyring: bool) -> Result<Arc<dyn TokenStore>> {
    if use_keyring {
        Ok(Arc::new(KeyringTokenStore::new()))
    } else {
        Ok(Arc::new(FileTokenStore::open_default()?))
    }
}

fn build_gateway(config: &Config, store: Arc<dyn TokenStore>) -> Result<Gateway> {
    let session = SessionContext::new(store).with_session_ended(|ended| {
        eprintln!("Session ended ({}). Run `lynkledger login` to continue.", ended.reason);
    });
    Gateway::from_config(config, Arc::new(session)).context("Failed to create API client")
}

/// Turn a gateway error into something worth printing.
fn report(err: GatewayError) -> anyhow::Error {
    debug!(error = ?err, "Command failed");
    if let Some(fields) = err.body().and_then(|b| b.field_errors()) {
        let lines: Vec<String> = fields
            .iter()
            .map(|(field, message)| format!("  {}: {}", field, message))
            .collect();
        return anyhow::anyhow!("The server rejected the request:\n{}", lines.join("\n"));
    }
    anyhow::anyhow!(err.user_message())
}

fn print_field_errors(errors: &lynkledger_core::api::FieldErrors) -> anyhow::Error {
    let lines: Vec<String> = errors
        .iter()
        .map(|(field, message)| format!("  {}: {}", field, message))
        .collect();
    anyhow::anyhow!("Invalid input:\n{}", lines.join("\n"))
}

fn prompt(label: &str, default: Option<&str>) -> Result<String> {
    match default {
        Some(value) => eprint!("{} [{}]: ", label, value),
        None => eprint!("{}: ", label),
    }
    io::stderr().flush()?;
    let mut line = String::new();
    io::stdin().read_line(&mut line)?;
    let line = line.trim();
    if line.is_empty() {
        Ok(default.unwrap_or_default().to_string())
    } else {
        Ok(line.to_string())
    }
}

fn print_members(org_id: i64, members: &[Membership]) {
    println!("Organization {} - {} members", org_id, members.len());
    for member in members {
        println!("  #{:<6} {:<12} {}", member.id, member.role, member.display_name());
    }
}

fn print_invitation(invitation: &Invitation) {
    println!(
        "  #{:<6} {:<30} {:<12} {:?}{}",
        invitation.id,
        invitation.email,
        invitation.role,
        invitation.status,
        invitation
            .organization_name
            .as_deref()
            .map(|name| format!(" ({})", name))
            .unwrap_or_default()
    );
}

async fn run(cli: Cli, config: Config) -> Result<()> {
    let store = open_store(cli.keyring)?;
    let gateway = build_gateway(&config, store)?;

    match cli.command {
        Command::Login { email } => {
            let email = match email {
                Some(email) => email,
                None => prompt("Email", config.last_email.as_deref())?,
            };
            let password = rpassword::prompt_password("Password: ")?;
            let form = LoginForm { email, password };
            form.validate().map_err(|e| print_field_errors(&e))?;

            gateway
                .login(form.email.trim(), &form.password)
                .await
                .map_err(report)?;
            match gateway.get_profile().await {
                Ok(user) => println!("Logged in as {}", user.display_name()),
                Err(e) => {
                    debug!(error = %e, "Profile fetch after login failed");
                    println!("Logged in");
                }
            }

            Config::remember_email(form.email.trim())?;
        }
        Command::Logout => {
            gateway.logout();
        }
        Command::Register {
            first_name,
            last_name,
            email,
            organization,
        } => {
            let password = rpassword::prompt_password("Password: ")?;
            let confirm_password = rpassword::prompt_password("Confirm password: ")?;
            let form = RegisterForm {
                first_name,
                last_name,
                email,
                password,
                confirm_password,
                organization_name: organization,
            };
            form.validate().map_err(|e| print_field_errors(&e))?;

            let response = gateway.register(&form).await.map_err(report)?;
            println!(
                "{}",
                response
                    .message
                    .unwrap_or_else(|| "Registration complete. Please log in.".to_string())
            );
        }
        Command::Status => {
            let session = gateway.session();
            println!("API:      {}", gateway.base_url());
            println!("Session:  {:?}", session.state());
            println!(
                "Refresh:  {}",
                if session.refresh_token()?.is_some() { "stored" } else { "none" }
            );
        }
        Command::Profile {
            first_name,
            last_name,
            email,
        } => {
            let update = ProfileUpdate {
                first_name,
                last_name,
                email,
            };
            let user = if update.is_empty() {
                gateway.get_profile().await
            } else {
                gateway.update_profile(&update).await
            }
            .map_err(report)?;
            println!("{} <{}>", user.display_name(), user.email);
            if let Some(joined) = user.date_joined {
                println!("Member since {}", joined.format("%Y-%m-%d"));
            }
        }
        Command::Orgs => {
            let organizations = gateway.organizations().await.map_err(report)?;
            for org in organizations {
                let role = org
                    .current_user_role
                    .map(|r| r.to_string())
                    .unwrap_or_else(|| "-".to_string());
                println!("  #{:<6} {:<30} {}", org.id, org.name, role);
            }
        }
        Command::Members { org_ids } => {
            if let [org_id] = org_ids.as_slice() {
                let overview = gateway.organization_overview(*org_id).await.map_err(report)?;
                print_members(*org_id, &overview.members);
                let open: Vec<&Invitation> =
                    overview.invitations.iter().filter(|i| i.is_open()).collect();
                if !open.is_empty() {
                    println!("Pending invitations");
                    for invitation in open {
                        print_invitation(invitation);
                    }
                }
            } else {
                let results = futures::future::join_all(
                    org_ids.iter().map(|id| gateway.organization_members(*id)),
                )
                .await;
                for (org_id, result) in org_ids.iter().zip(results) {
                    match result {
                        Ok(members) => print_members(*org_id, &members),
                        Err(e) => eprintln!("Organization {}: {}", org_id, e.user_message()),
                    }
                }
            }
        }
        Command::Invitations => {
            let invitations = gateway.organization_invitations().await.map_err(report)?;
            for invitation in &invitations {
                print_invitation(invitation);
            }
        }
        Command::Invite {
            org_id,
            email,
            role,
            message,
        } => {
            let form = InviteForm {
                email,
                role,
                message,
            };
            form.validate().map_err(|e| print_field_errors(&e))?;
            let invitation = gateway.invite_member(org_id, &form).await.map_err(report)?;
            println!("Invitation #{} sent to {}", invitation.id, invitation.email);
        }
        Command::SetRole {
            membership_id,
            role,
        } => {
            let membership = gateway
                .update_member_role(membership_id, role)
                .await
                .map_err(report)?;
            println!("{} is now {}", membership.display_name(), membership.role);
        }
        Command::RemoveMember { membership_id } => {
            gateway.remove_member(membership_id).await.map_err(report)?;
            println!("Membership #{} removed", membership_id);
        }
        Command::CancelInvitation { invitation_id } => {
            gateway.cancel_invitation(invitation_id).await.map_err(report)?;
            println!("Invitation #{} cancelled", invitation_id);
        }
        Command::ShowInvitation { token } => {
            let invitation = gateway.get_invitation(&token).await.map_err(report)?;
            print_invitation(&invitation);
            if let Some(by) = invitation.invited_by_name.as_deref() {
                println!("Invited by {}", by);
            }
        }
        Command::AcceptInvitation { token } => {
            gateway.accept_invitation(&token).await.map_err(report)?;
            println!("Invitation accepted. You can now log in.");
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    let log_dir = Config::cache_dir()
        .ok()
        .filter(|dir| std::fs::create_dir_all(dir).is_ok());
    let _log_guard = init_tracing(log_dir);
    info!("LynkLedger CLI starting");

    // Overrides stay in memory; only `last_email` is ever written back
    let mut config = Config::load()?;
    if let Some(ref url) = cli.api_url {
        config.api_url = url.clone();
    }

    run(cli, config).await
}
