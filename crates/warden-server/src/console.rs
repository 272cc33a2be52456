//! Line-oriented JSON interface over stdin/stdout
//!
//! Each input line is one request; each output line is the response:
//!
//! ```text
//! {"op":"check","role":"member","resource":"orders","action":"list"}
//! {"op":"event","notification":{"event":"role_saved","role_name":"member"}}
//! {"op":"grants"}
//! {"op":"begin"}
//! {"op":"commit","transaction":"01927f6e-8b4c-7d1a-9f3e-2c5b8a7d4e10"}
//! ```
//!
//! Events carrying a transaction stay staged until that transaction is
//! committed through this interface.

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{debug, warn};

use warden_acl::CheckContext;
use warden_core::TransactionId;
use warden_sync::LifecycleNotification;

use crate::bootstrap::Service;

#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Request {
    Check {
        role: String,
        resource: String,
        action: String,
        #[serde(default)]
        context: CheckContext,
    },
    Event {
        notification: LifecycleNotification,
    },
    Grants,
    Begin,
    Commit {
        transaction: TransactionId,
    },
    Rollback {
        transaction: TransactionId,
    },
}

#[derive(Debug, Serialize)]
pub struct Response {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Response {
    fn success(result: serde_json::Value) -> Self {
        Self {
            ok: true,
            result: Some(result),
            error: None,
        }
    }

    fn failure(error: impl ToString) -> Self {
        Self {
            ok: false,
            result: None,
            error: Some(error.to_string()),
        }
    }
}

/// Answer one request line
pub async fn handle_line(service: &Service, line: &str) -> Response {
    let engine = &service.engine;
    let request: Request = match serde_json::from_str(line) {
        Ok(request) => request,
        Err(e) => return Response::failure(format!("Invalid request: {}", e)),
    };

    match request {
        Request::Check {
            role,
            resource,
            action,
            mut context,
        } => {
            if context.current_role.is_none() {
                context.current_role = Some(role.clone());
            }
            match engine.acl().check(&role, &resource, &action, &context).await {
                Ok(decision) => to_response(&decision),
                Err(e) => Response::failure(e),
            }
        }
        Request::Event { notification } => match engine.handle(notification).await {
            Ok(outcome) => to_response(&outcome),
            Err(e) => Response::failure(e),
        },
        Request::Grants => {
            let grants: Vec<serde_json::Value> = engine
                .acl()
                .effective_grants()
                .await
                .into_iter()
                .map(|(key, grant)| {
                    serde_json::json!({
                        "role": key.role,
                        "resource": key.resource,
                        "action": key.action,
                        "fields": grant.fields,
                        "scope": grant.scope,
                    })
                })
                .collect();
            Response::success(serde_json::Value::Array(grants))
        }
        Request::Begin => {
            let tx = service.store.begin().await;
            Response::success(serde_json::json!({ "transaction": tx }))
        }
        Request::Commit { transaction } => {
            match engine.commit(service.store.as_ref(), transaction).await {
                Ok(applied) => Response::success(serde_json::json!({ "applied": applied })),
                Err(e) => Response::failure(e),
            }
        }
        Request::Rollback { transaction } => {
            match engine.rollback(service.store.as_ref(), transaction).await {
                Ok(discarded) => Response::success(serde_json::json!({ "discarded": discarded })),
                Err(e) => Response::failure(e),
            }
        }
    }
}

fn to_response<T: Serialize>(value: &T) -> Response {
    match serde_json::to_value(value) {
        Ok(value) => Response::success(value),
        Err(e) => Response::failure(e),
    }
}

/// Serve requests from stdin until it closes
pub async fn run(service: &Service) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let response = handle_line(service, line).await;
        if let Some(error) = &response.error {
            warn!("Request failed: {}", error);
        }
        let mut out = serde_json::to_vec(&response)?;
        out.push(b'\n');
        stdout.write_all(&out).await?;
        stdout.flush().await?;
    }

    debug!("Input closed");
    Ok(())
}
