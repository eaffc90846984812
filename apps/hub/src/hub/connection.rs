//! Per-validator connection handling.
//!
//! One task per accepted socket reads newline-delimited JSON frames;
//! a paired writer task drains the session's outbound channel. A
//! connection does nothing useful until its signup verifies, and on
//! close the session is deregistered exactly once even when a
//! heartbeat eviction races the disconnect.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::SystemTime;

use anyhow::{Context, Result, bail};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream, tcp::OwnedWriteHalf};
use tokio::sync::mpsc;
use uuid::Uuid;

use super::correlation::PendingProbes;
use super::messages::{IncomingMessage, OutgoingMessage, SignupAck, SignupRequest};
use crate::crypto::{signup_message, verify_signature};
use crate::database::Database;
use crate::database::models::Validator;
use crate::geo::GeoLookup;
use crate::region::{Region, classify, is_private_ip};
use crate::registry::{SessionHandle, ValidatorRegistry};

/// Shared dependencies every connection task needs.
pub struct ConnectionContext {
    pub registry: Arc<ValidatorRegistry>,
    pub pending: Arc<PendingProbes>,
    pub database: Arc<dyn Database>,
    pub geo: Arc<GeoLookup>,
}

/// Accept loop. Runs until the listener errors out.
pub async fn serve(listener: TcpListener, ctx: Arc<ConnectionContext>) -> Result<()> {
    let local = listener.local_addr().context("listener has no local address")?;
    tracing::info!("Accepting validator connections on {}", local);

    loop {
        let (stream, peer) = listener.accept().await?;
        let ctx = Arc::clone(&ctx);
        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, peer, ctx).await {
                tracing::debug!("Connection from {} closed: {}", peer, e);
            }
        });
    }
}

async fn write_frame(writer: &mut OwnedWriteHalf, message: &OutgoingMessage) -> Result<()> {
    let mut line = serde_json::to_vec(message)?;
    line.push(b'\n');
    writer.write_all(&line).await?;
    Ok(())
}

async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    ctx: Arc<ConnectionContext>,
) -> Result<()> {
    let (reader, mut writer) = stream.into_split();
    let (outbound_tx, mut outbound_rx) = mpsc::channel::<OutgoingMessage>(64);

    let writer_task = tokio::spawn(async move {
        while let Some(message) = outbound_rx.recv().await {
            if let Err(e) = write_frame(&mut writer, &message).await {
                tracing::debug!("Write failed, dropping connection: {}", e);
                break;
            }
        }
    });

    let mut lines = BufReader::new(reader).lines();
    let mut registered: Option<Arc<SessionHandle>> = None;

    // Read until EOF or transport error; either way the session must
    // come out of the registry, so the result is only propagated
    // after cleanup.
    let result = read_loop(&mut lines, peer, &ctx, &outbound_tx, &mut registered).await;

    drop(outbound_tx);
    if let Some(session) = registered {
        // `remove` returning false means a heartbeat sweep already
        // deregistered this session.
        if ctx.registry.remove(session.region, session.session_id) {
            if let Err(e) = ctx.database.mark_validator_inactive(session.validator_id).await {
                tracing::error!(
                    "Failed to mark validator {} inactive: {}",
                    session.validator_id,
                    e
                );
            }
            tracing::info!("Validator {} disconnected from {}", session.validator_id, peer);
        }
    }
    writer_task.abort();
    result
}

async fn read_loop(
    lines: &mut tokio::io::Lines<BufReader<tokio::net::tcp::OwnedReadHalf>>,
    peer: SocketAddr,
    ctx: &ConnectionContext,
    outbound_tx: &mpsc::Sender<OutgoingMessage>,
    registered: &mut Option<Arc<SessionHandle>>,
) -> Result<()> {
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let message: IncomingMessage = match serde_json::from_str(&line) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!("Unparseable frame from {}: {}", peer, e);
                continue;
            }
        };

        match message {
            IncomingMessage::Signup(request) => {
                if let Some(session) = registered.as_ref() {
                    tracing::warn!(
                        "Ignoring repeat signup from {} (validator {})",
                        peer,
                        session.validator_id
                    );
                    continue;
                }
                match process_signup(&request, peer, ctx, outbound_tx.clone()).await {
                    Ok(session) => {
                        // Record the session before acking: a failed
                        // ack write must still deregister it.
                        *registered = Some(Arc::clone(&session));
                        session
                            .send(OutgoingMessage::Signup(SignupAck {
                                validator_id: session.validator_id,
                                callback_id: request.callback_id,
                            }))
                            .await?;
                        tracing::info!(
                            "Validator {} signed up from {} into {}",
                            session.validator_id,
                            peer,
                            session.region
                        );
                    }
                    Err(e) => {
                        tracing::warn!("Rejected signup from {}: {}", peer, e);
                    }
                }
            }
            IncomingMessage::Validate(reply) => {
                if let Some(session) = registered.as_ref() {
                    session.touch_heartbeat();
                }
                let callback_id = reply.callback_id;
                if !ctx.pending.complete(callback_id, reply) {
                    tracing::debug!("Dropping stale reply for callback {}", callback_id);
                }
            }
            IncomingMessage::Heartbeat => {
                if let Some(session) = registered.as_ref() {
                    session.touch_heartbeat();
                }
            }
        }
    }
    Ok(())
}

/// Verify a signup, resolve the validator's identity and region, and
/// register the session.
async fn process_signup(
    request: &SignupRequest,
    peer: SocketAddr,
    ctx: &ConnectionContext,
    outbound: mpsc::Sender<OutgoingMessage>,
) -> Result<Arc<SessionHandle>> {
    let expected = signup_message(request.callback_id, &request.public_key);
    if let Err(e) = verify_signature(&expected, &request.public_key, &request.signed_message) {
        bail!("signup signature rejected: {e}");
    }

    let ip = peer.ip();
    let (region, geo) = if is_private_ip(ip) {
        (Region::Dev, crate::geo::GeoInfo::unknown())
    } else {
        let geo = ctx.geo.lookup(ip).await;
        let text = [geo.city.as_deref(), geo.country.as_deref()]
            .into_iter()
            .flatten()
            .collect::<Vec<_>>()
            .join(", ");
        (classify(&text, geo.latitude, geo.longitude), geo)
    };

    // Identity is the public key: reconnects reuse the stored row and
    // its payout balance, fresh keys mint a new one.
    let validator_id = match ctx.database.validator_by_public_key(&request.public_key).await? {
        Some(existing) => existing.id,
        None => Uuid::new_v4(),
    };
    let now = SystemTime::now();
    ctx.database
        .upsert_validator(&Validator {
            id: validator_id,
            public_key: request.public_key.clone(),
            ip: Some(ip.to_string()),
            country: geo.country,
            city: geo.city,
            latitude: geo.latitude,
            longitude: geo.longitude,
            region,
            is_active: true,
            pending_payouts: 0,
            processing_payout: false,
            first_seen_at: now,
            last_seen_at: now,
        })
        .await?;

    let session =
        Arc::new(SessionHandle::new(validator_id, request.public_key.clone(), region, outbound));
    ctx.registry.add(Arc::clone(&session));
    Ok(session)
}
