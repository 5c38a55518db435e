use actix_web::{dev::Payload, test, FromRequest};
use hood::auth::{create_jwt, decode_jwt, Auth, Claims};
use jsonwebtoken::{encode, EncodingKey, Header};
use serial_test::serial;
use std::env;

const SECRET: &str = "test-secret-must-be-32-bytes-long!!";

// Helper that guarantees a sufficiently long secret for tests.
fn set_secret() {
    env::set_var("JWT_SECRET", SECRET);
}

async fn extract(header: Option<String>) -> Result<Auth, actix_web::Error> {
    let mut req = test::TestRequest::default();
    if let Some(h) = header {
        req = req.insert_header(("Authorization", h));
    }
    let req = req.to_http_request();
    let mut pl = Payload::None;
    Auth::from_request(&req, &mut pl).await
}

#[actix_web::test]
#[serial]
async fn jwt_roundtrip_ok() {
    set_secret();
    let token = create_jwt(42, "tester").expect("token");
    let auth = extract(Some(format!("Bearer {token}"))).await.expect("extract");
    assert_eq!(auth.user_id(), 42);
    assert_eq!(auth.0.name, "tester");
}

#[actix_web::test]
#[serial]
async fn extractor_rejects_missing_and_invalid_tokens() {
    set_secret();
    assert!(extract(None).await.is_err());
    assert!(extract(Some("Bearer notatoken".into())).await.is_err());
    assert!(extract(Some("Basic dXNlcjpwYXNz".into())).await.is_err());
}

#[actix_web::test]
#[serial]
async fn expired_and_foreign_tokens_are_rejected() {
    set_secret();
    let expired = Claims { sub: "7".into(), name: "old".into(), exp: 1 };
    let token = encode(&Header::default(), &expired, &EncodingKey::from_secret(SECRET.as_bytes())).unwrap();
    assert!(decode_jwt(&token).is_err());

    let far_future = (chrono::Utc::now() + chrono::Duration::hours(1)).timestamp() as usize;
    let other_key = Claims { sub: "7".into(), name: "mallory".into(), exp: far_future };
    let token = encode(&Header::default(), &other_key, &EncodingKey::from_secret(b"another-secret-that-is-long-enough!")).unwrap();
    assert!(decode_jwt(&token).is_err());
}

#[actix_web::test]
#[serial]
async fn subject_must_be_a_user_id() {
    set_secret();
    let exp = (chrono::Utc::now() + chrono::Duration::hours(1)).timestamp() as usize;
    let claims = Claims { sub: "discord:1234".into(), name: "x".into(), exp };
    let token = encode(&Header::default(), &claims, &EncodingKey::from_secret(SECRET.as_bytes())).unwrap();
    assert!(decode_jwt(&token).is_err());
    assert!(extract(Some(format!("Bearer {token}"))).await.is_err());
}
