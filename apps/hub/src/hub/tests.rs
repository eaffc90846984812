use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use uuid::Uuid;

use super::connection::{self, ConnectionContext};
use super::correlation::PendingProbes;
use super::dispatch::DispatchEngine;
use super::messages::{IncomingMessage, OutgoingMessage, SignupRequest, ValidateReply};
use crate::aggregate::AggregateSettings;
use crate::crypto::{KeyPair, generate_keypair, reply_message, sign_message, signup_message};
use crate::database::models::{RollupPeriod, SiteStatus, Website};
use crate::database::{Database, DatabaseImpl, initialize_database};
use crate::pool::build_pool;
use crate::region::Region;
use crate::registry::ValidatorRegistry;

struct TestHub {
    ctx: Arc<ConnectionContext>,
    database: Arc<DatabaseImpl>,
    addr: std::net::SocketAddr,
    _dir: TempDir,
}

async fn start_test_hub() -> TestHub {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("hub.db");
    let pool = build_pool(path.to_str().unwrap()).await.unwrap();
    let conn = pool.get().await.unwrap();
    initialize_database(&conn).await.unwrap();
    let database = Arc::new(DatabaseImpl::new_from_pool(pool));

    let ctx = Arc::new(ConnectionContext {
        registry: Arc::new(ValidatorRegistry::new()),
        pending: Arc::new(PendingProbes::new()),
        database: Arc::clone(&database) as Arc<dyn Database>,
        geo: Arc::new(crate::geo::GeoLookup::new()),
    });

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(connection::serve(listener, Arc::clone(&ctx)));

    TestHub { ctx, database, addr, _dir: dir }
}

fn test_engine(hub: &TestHub, probe_timeout: Duration) -> Arc<DispatchEngine> {
    Arc::new(DispatchEngine::new(
        Arc::clone(&hub.ctx.registry),
        Arc::clone(&hub.ctx.pending),
        Arc::clone(&hub.ctx.database),
        AggregateSettings::default(),
        Duration::from_secs(60),
        probe_timeout,
    ))
}

/// A scripted validator on the far side of a real socket.
struct FakeValidator {
    keypair: KeyPair,
    validator_id: Uuid,
    lines: Lines<BufReader<OwnedReadHalf>>,
    writer: OwnedWriteHalf,
}

impl FakeValidator {
    async fn connect_and_signup(addr: std::net::SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).await.unwrap();
        let (reader, writer) = stream.into_split();
        let lines = BufReader::new(reader).lines();
        let keypair = generate_keypair();

        let mut validator =
            Self { keypair, validator_id: Uuid::nil(), lines, writer };

        let callback_id = Uuid::new_v4();
        let public_key = validator.keypair.public_key_b58();
        let signed_message =
            sign_message(&signup_message(callback_id, &public_key), &validator.keypair).unwrap();
        validator
            .send(&IncomingMessage::Signup(SignupRequest {
                callback_id,
                public_key,
                signed_message,
            }))
            .await;

        let OutgoingMessage::Signup(ack) = validator.next_message().await else {
            panic!("expected signup ack");
        };
        assert_eq!(ack.callback_id, callback_id);
        validator.validator_id = ack.validator_id;
        validator
    }

    async fn send(&mut self, message: &IncomingMessage) {
        let mut line = serde_json::to_vec(message).unwrap();
        line.push(b'\n');
        self.writer.write_all(&line).await.unwrap();
    }

    async fn next_message(&mut self) -> OutgoingMessage {
        let line = tokio::time::timeout(Duration::from_secs(5), self.lines.next_line())
            .await
            .expect("timed out waiting for hub message")
            .unwrap()
            .expect("connection closed");
        serde_json::from_str(&line).unwrap()
    }

    fn online_reply(&self, callback_id: Uuid, website_id: Uuid, total: u64) -> IncomingMessage {
        IncomingMessage::Validate(ValidateReply {
            callback_id,
            website_id,
            validator_id: self.validator_id,
            status_code: Some(200),
            name_lookup: Some(3),
            connection: Some(12),
            tls_handshake: Some(25),
            ttfb: Some(total.saturating_sub(45)),
            data_transfer: Some(5),
            total: Some(total),
            error: None,
            signed_message: sign_message(&reply_message(callback_id), &self.keypair).unwrap(),
        })
    }
}

async fn eventually(mut check: impl FnMut() -> bool) {
    for _ in 0..100 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("condition not reached in time");
}

#[tokio::test]
async fn signup_and_disconnect_lifecycle() {
    let hub = start_test_hub().await;
    let validator = FakeValidator::connect_and_signup(hub.addr).await;

    // Loopback peers land in the dev region, no geo lookup involved.
    assert_eq!(hub.ctx.registry.count_active(), 1);
    assert_eq!(hub.ctx.registry.count_in_region(Region::Dev), 1);

    let stored = hub.database.validator_by_id(validator.validator_id).await.unwrap().unwrap();
    assert!(stored.is_active);
    assert_eq!(stored.region, Region::Dev);
    assert_eq!(stored.public_key, validator.keypair.public_key_b58());

    let validator_id = validator.validator_id;
    drop(validator);
    let registry = Arc::clone(&hub.ctx.registry);
    eventually(move || registry.count_active() == 0).await;

    // The inactive flag is written just after deregistration; poll for it.
    let mut marked_inactive = false;
    for _ in 0..100 {
        let stored = hub.database.validator_by_id(validator_id).await.unwrap().unwrap();
        if !stored.is_active {
            marked_inactive = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(marked_inactive, "disconnect must mark the validator inactive");
}

#[tokio::test]
async fn transport_error_still_deregisters() {
    let hub = start_test_hub().await;
    let mut validator = FakeValidator::connect_and_signup(hub.addr).await;
    assert_eq!(hub.ctx.registry.count_active(), 1);

    // A frame that is not valid UTF-8 makes the hub's line reader
    // fail with an I/O error instead of a clean end-of-stream; the
    // session must still come out of the registry.
    validator.writer.write_all(&[0xff, 0xfe, 0xfd, b'\n']).await.unwrap();

    let registry = Arc::clone(&hub.ctx.registry);
    eventually(move || registry.count_active() == 0).await;

    let mut marked_inactive = false;
    for _ in 0..100 {
        let stored =
            hub.database.validator_by_id(validator.validator_id).await.unwrap().unwrap();
        if !stored.is_active {
            marked_inactive = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(marked_inactive, "an errored connection must mark the validator inactive");
}

#[tokio::test]
async fn rejected_signup_keeps_registry_empty() {
    let hub = start_test_hub().await;
    let stream = TcpStream::connect(hub.addr).await.unwrap();
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    let keypair = generate_keypair();
    let callback_id = Uuid::new_v4();
    // Signature over the wrong callback id must be rejected.
    let signed_message =
        sign_message(&signup_message(Uuid::new_v4(), &keypair.public_key_b58()), &keypair).unwrap();
    let msg = IncomingMessage::Signup(SignupRequest {
        callback_id,
        public_key: keypair.public_key_b58(),
        signed_message,
    });
    let mut line = serde_json::to_vec(&msg).unwrap();
    line.push(b'\n');
    writer.write_all(&line).await.unwrap();

    // No ack arrives; give the hub a moment and check nothing registered.
    let got_reply = tokio::time::timeout(Duration::from_millis(300), lines.next_line()).await;
    assert!(got_reply.is_err(), "hub must not ack a bad signup");
    assert_eq!(hub.ctx.registry.count_active(), 0);
}

#[tokio::test]
async fn full_probe_round_trip_records_everything() {
    let hub = start_test_hub().await;
    let engine = test_engine(&hub, Duration::from_secs(5));

    let website = Website::new("https://example.com".into(), "owner-1".into(), 60);
    hub.database.save_website(&website).await.unwrap();

    let mut validator = FakeValidator::connect_and_signup(hub.addr).await;

    let tick_engine = Arc::clone(&engine);
    let tick = tokio::spawn(async move { tick_engine.tick().await });

    let OutgoingMessage::Validate(request) = validator.next_message().await else {
        panic!("expected validate request");
    };
    assert_eq!(request.website_id, website.id);
    assert_eq!(request.url, website.url);

    let reply = validator.online_reply(request.callback_id, request.website_id, 150);
    validator.send(&reply).await;

    tick.await.unwrap().unwrap();

    let loaded = hub.database.website_by_id(website.id).await.unwrap().unwrap();
    assert_eq!(loaded.status, SiteStatus::Online);
    assert!(loaded.up_since.is_some());
    assert!(loaded.last_checked_at.is_some());
    assert_eq!(loaded.uptime_percentage, 100.0);

    let ticks = hub
        .database
        .ticks_for_website(website.id, std::time::SystemTime::now() - Duration::from_secs(3600))
        .await
        .unwrap();
    assert_eq!(ticks.len(), 1);
    assert_eq!(ticks[0].validator_id, validator.validator_id);
    assert_eq!(ticks[0].region, Region::Dev);
    assert_eq!(ticks[0].timings.unwrap().total_ms, 150);

    let stored = hub.database.validator_by_id(validator.validator_id).await.unwrap().unwrap();
    assert_eq!(stored.pending_payouts, AggregateSettings::default().lamports_per_validation);

    let daily = hub.database.uptime_history_for(website.id, RollupPeriod::Daily).await.unwrap();
    assert_eq!(daily.len(), 1);

    assert!(hub.ctx.pending.is_empty());
    for session in hub.ctx.registry.all_sessions() {
        assert_eq!(session.active_checks(), 0);
    }
}

#[tokio::test]
async fn probe_timeout_leaves_no_trace() {
    let hub = start_test_hub().await;
    let engine = test_engine(&hub, Duration::from_millis(200));

    let website = Website::new("https://example.com".into(), "owner-1".into(), 60);
    hub.database.save_website(&website).await.unwrap();

    let mut validator = FakeValidator::connect_and_signup(hub.addr).await;

    let tick_engine = Arc::clone(&engine);
    let tick = tokio::spawn(async move { tick_engine.tick().await });

    // Receive the request but never reply.
    let OutgoingMessage::Validate(_request) = validator.next_message().await else {
        panic!("expected validate request");
    };
    tick.await.unwrap().unwrap();

    let loaded = hub.database.website_by_id(website.id).await.unwrap().unwrap();
    assert_eq!(loaded.status, SiteStatus::Unknown);
    assert!(loaded.last_checked_at.is_none(), "a timed-out probe is not a check");

    let ticks = hub
        .database
        .ticks_for_website(website.id, std::time::SystemTime::now() - Duration::from_secs(3600))
        .await
        .unwrap();
    assert!(ticks.is_empty());

    let stored = hub.database.validator_by_id(validator.validator_id).await.unwrap().unwrap();
    assert_eq!(stored.pending_payouts, 0);

    assert!(hub.ctx.pending.is_empty());
    for session in hub.ctx.registry.all_sessions() {
        assert_eq!(session.active_checks(), 0);
    }
}

#[tokio::test]
async fn failed_probe_marks_site_offline_without_timings() {
    let hub = start_test_hub().await;
    let engine = test_engine(&hub, Duration::from_secs(5));

    let website = Website::new("https://broken.example".into(), "owner-1".into(), 60);
    hub.database.save_website(&website).await.unwrap();

    let mut validator = FakeValidator::connect_and_signup(hub.addr).await;
    let tick_engine = Arc::clone(&engine);
    let tick = tokio::spawn(async move { tick_engine.tick().await });

    let OutgoingMessage::Validate(request) = validator.next_message().await else {
        panic!("expected validate request");
    };
    let reply = IncomingMessage::Validate(ValidateReply {
        callback_id: request.callback_id,
        website_id: request.website_id,
        validator_id: validator.validator_id,
        status_code: None,
        name_lookup: None,
        connection: None,
        tls_handshake: None,
        ttfb: None,
        data_transfer: None,
        total: None,
        error: Some("connection refused".into()),
        signed_message: sign_message(&reply_message(request.callback_id), &validator.keypair)
            .unwrap(),
    });
    validator.send(&reply).await;
    tick.await.unwrap().unwrap();

    let loaded = hub.database.website_by_id(website.id).await.unwrap().unwrap();
    assert_eq!(loaded.status, SiteStatus::Offline);
    assert!(loaded.up_since.is_none());

    let ticks = hub
        .database
        .ticks_for_website(website.id, std::time::SystemTime::now() - Duration::from_secs(3600))
        .await
        .unwrap();
    assert_eq!(ticks.len(), 1);
    assert!(ticks[0].timings.is_none());
    assert_eq!(ticks[0].error.as_deref(), Some("connection refused"));
}
