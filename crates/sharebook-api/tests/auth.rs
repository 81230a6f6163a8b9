//! Accounts, sessions, password resets and profile edits.

mod common;

use std::sync::{Arc, Mutex};

use common::{client, register};
use sharebook_api::{Config, Database, Error, ResetMailer, ShareBook};
use sharebook_types::api::{LoginRequest, ProfileUpdate, RegisterRequest};

/// Keeps every token it is asked to deliver.
#[derive(Default)]
struct Outbox {
    sent: Mutex<Vec<(String, String)>>,
}

impl Outbox {
    fn last_token(&self) -> Option<String> {
        self.sent.lock().unwrap().last().map(|(_, token)| token.clone())
    }

    fn count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }
}

impl ResetMailer for Outbox {
    fn send_reset(&self, email: &str, token: &str) -> anyhow::Result<()> {
        self.sent.lock().unwrap().push((email.to_string(), token.to_string()));
        Ok(())
    }
}

fn client_with_outbox(config: Config) -> (ShareBook, Arc<Outbox>) {
    let outbox = Arc::new(Outbox::default());
    let client = ShareBook::new(config, Database::open_in_memory().unwrap(), outbox.clone());
    (client, outbox)
}

fn login(email: &str, password: &str) -> LoginRequest {
    LoginRequest {
        email: email.into(),
        password: password.into(),
    }
}

#[tokio::test]
async fn registration_creates_a_profile_and_signs_in() {
    let client = client();
    let session = register(&client, "Latifa", "Latifa@Example.com").await;

    assert_eq!(session.email, "latifa@example.com");
    assert_eq!(client.auth().current_user(), Some(session.clone()));

    let claims = client.auth().verify_token(&session.token).unwrap();
    assert_eq!(claims.sub, session.user_id);

    let profile = client.profiles().get_user(session.user_id).await.unwrap().unwrap();
    assert_eq!(profile.id, session.user_id);
    assert_eq!(profile.name, "Latifa");
    assert_eq!(profile.location, "Alexandria");
    assert_eq!(profile.avatar, None);
    assert!(profile.created_at <= chrono::Utc::now());
}

#[tokio::test]
async fn duplicate_emails_are_refused_regardless_of_case() {
    let client = client();
    register(&client, "Latifa", "latifa@example.com").await;

    let again = client
        .auth()
        .register(RegisterRequest {
            email: "LATIFA@example.com".into(),
            password: "another1".into(),
            name: "Someone Else".into(),
            location: "Tanta".into(),
            phone: Some("0100".into()),
        })
        .await;

    assert!(matches!(again, Err(Error::EmailTaken)));
}

#[tokio::test]
async fn weak_registrations_are_rejected() {
    let client = client();
    let base = RegisterRequest {
        email: "ok@example.com".into(),
        password: "longenough".into(),
        name: "Ok".into(),
        location: "Aswan".into(),
        phone: None,
    };

    let bad_email = RegisterRequest { email: "not-an-email".into(), ..base.clone() };
    let short_password = RegisterRequest { password: "12345".into(), ..base.clone() };
    let no_name = RegisterRequest { name: " ".into(), ..base };

    for req in [bad_email, short_password, no_name] {
        assert!(matches!(client.auth().register(req).await, Err(Error::Validation(_))));
    }
    assert_eq!(client.auth().current_user(), None);
}

#[tokio::test]
async fn login_failures_look_the_same() {
    let client = client();
    register(&client, "Latifa", "latifa@example.com").await;
    client.auth().logout();
    assert_eq!(client.auth().current_user(), None);

    let wrong_password = client.auth().login(login("latifa@example.com", "nope-nope")).await;
    let unknown = client.auth().login(login("ghost@example.com", "hunter22")).await;
    assert!(matches!(wrong_password, Err(Error::InvalidCredentials)));
    assert!(matches!(unknown, Err(Error::InvalidCredentials)));

    let session = client.auth().login(login(" LATIFA@example.com ", "hunter22")).await.unwrap();
    assert_eq!(client.auth().current_user(), Some(session));
}

#[tokio::test]
async fn id_tokens_need_a_session() {
    let client = client();
    assert!(matches!(client.auth().id_token(), Err(Error::Unauthenticated)));

    let session = register(&client, "Latifa", "latifa@example.com").await;
    let token = client.auth().id_token().unwrap();
    assert_eq!(client.auth().verify_token(&token).unwrap().sub, session.user_id);

    assert!(matches!(client.auth().verify_token("forged"), Err(Error::Unauthenticated)));
}

#[tokio::test]
async fn password_reset_tokens_work_once() {
    let (client, outbox) = client_with_outbox(Config::default());
    register(&client, "Latifa", "latifa@example.com").await;

    client.auth().request_password_reset("latifa@example.com").await.unwrap();
    let token = outbox.last_token().unwrap();

    client.auth().confirm_password_reset(&token, "brand-new-pass").await.unwrap();
    let reused = client.auth().confirm_password_reset(&token, "third-pass").await;
    assert!(matches!(reused, Err(Error::InvalidResetToken)));

    let old = client.auth().login(login("latifa@example.com", "hunter22")).await;
    assert!(matches!(old, Err(Error::InvalidCredentials)));
    client.auth().login(login("latifa@example.com", "brand-new-pass")).await.unwrap();
}

#[tokio::test]
async fn reset_requests_for_unknown_addresses_send_nothing() {
    let (client, outbox) = client_with_outbox(Config::default());

    client.auth().request_password_reset("ghost@example.com").await.unwrap();
    assert_eq!(outbox.count(), 0);

    let guessed = client.auth().confirm_password_reset("deadbeef", "whatever1").await;
    assert!(matches!(guessed, Err(Error::InvalidResetToken)));
}

#[tokio::test]
async fn expired_reset_tokens_are_refused() {
    let config = Config {
        reset_ttl: chrono::Duration::minutes(-1),
        ..Config::default()
    };
    let (client, outbox) = client_with_outbox(config);
    register(&client, "Latifa", "latifa@example.com").await;

    client.auth().request_password_reset("latifa@example.com").await.unwrap();
    let token = outbox.last_token().unwrap();

    let result = client.auth().confirm_password_reset(&token, "too-late-now").await;
    assert!(matches!(result, Err(Error::InvalidResetToken)));
}

#[tokio::test]
async fn profile_updates_only_touch_given_fields() {
    let client = client();
    let session = register(&client, "Latifa", "latifa@example.com").await;

    client
        .profiles()
        .update_profile(ProfileUpdate {
            location: Some("Luxor".into()),
            phone: Some("0122".into()),
            ..ProfileUpdate::default()
        })
        .await
        .unwrap();

    let profile = client.profiles().get_user(session.user_id).await.unwrap().unwrap();
    assert_eq!(profile.name, "Latifa");
    assert_eq!(profile.location, "Luxor");
    assert_eq!(profile.phone.as_deref(), Some("0122"));

    let blank_name = ProfileUpdate {
        name: Some("".into()),
        ..ProfileUpdate::default()
    };
    let result = client.profiles().update_profile(blank_name).await;
    assert!(matches!(result, Err(Error::Validation(_))));
}

#[tokio::test]
async fn profile_writes_only_reach_the_signed_in_user() {
    let client = client();
    let latifa = register(&client, "Latifa", "latifa@example.com").await;
    let other = register(&client, "Other", "other@example.com").await;

    let rename = ProfileUpdate {
        name: Some("Renamed".into()),
        ..ProfileUpdate::default()
    };
    client.profiles().update_profile(rename.clone()).await.unwrap();

    let untouched = client.profiles().get_user(latifa.user_id).await.unwrap().unwrap();
    let renamed = client.profiles().get_user(other.user_id).await.unwrap().unwrap();
    assert_eq!(untouched.name, "Latifa");
    assert_eq!(renamed.name, "Renamed");

    client.auth().logout();
    let signed_out = client.profiles().update_profile(rename).await;
    assert!(matches!(signed_out, Err(Error::Unauthenticated)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_registrations_of_one_email_leave_one_account() {
    let client = client();
    let request = |name: &str| RegisterRequest {
        email: "ada@example.com".into(),
        password: "hunter22".into(),
        name: name.into(),
        location: "Cairo".into(),
        phone: None,
    };

    let (a, b) = tokio::join!(
        client.auth().register(request("Ada")),
        client.auth().register(request("Also Ada")),
    );

    let (winner, loser) = match (a, b) {
        (Ok(session), Err(e)) | (Err(e), Ok(session)) => (session, e),
        (a, b) => panic!("expected one success and one failure, got {:?} and {:?}", a, b),
    };
    assert!(matches!(loser, Error::EmailTaken), "got {:?}", loser);

    client.auth().logout();
    let session = client.auth().login(login("ada@example.com", "hunter22")).await.unwrap();
    assert_eq!(session.user_id, winner.user_id);
    assert!(client.profiles().get_user(winner.user_id).await.unwrap().is_some());
}
