use chrono::{TimeDelta, TimeZone, Utc};
use nullout_core::identity::FileIdentity;
use nullout_core::token::{SigningSecret, TokenCodec, TokenSubject};
use nullout_core::{ConfirmationToken, Error};

fn codec(secret: &str) -> TokenCodec {
    TokenCodec::new(SigningSecret::new(secret.as_bytes().to_vec()).unwrap())
}

fn subject() -> TokenSubject {
    TokenSubject {
        finding_id: "0f8fad5b-d9cb-469f-a165-70867728950e".to_string(),
        root: r"C:\Users\me\Downloads".to_string(),
        path: r"sub\NUL.txt".to_string(),
        identity: FileIdentity::new(0x1234_ABCD, 0x0001_0000_0000_002A),
    }
}

#[test]
fn test_every_single_character_alteration_is_tampered() {
    let codec = codec("token-tests-secret");
    let issued_at = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
    let issued = codec
        .issue_at(&subject(), TimeDelta::seconds(300), issued_at)
        .unwrap();
    let original = issued.token.as_str().to_string();
    assert!(codec.verify_at(&issued.token, issued_at).is_ok());

    for (index, current) in original.char_indices() {
        let replacement = if current == 'A' { 'B' } else { 'A' };
        let mut altered = original.clone();
        altered.replace_range(index..index + current.len_utf8(), &replacement.to_string());

        let result = codec.verify_at(&ConfirmationToken::from(altered), issued_at);
        assert_eq!(
            result.err(),
            Some(Error::TamperedToken),
            "alteration at byte {index} was accepted"
        );
    }
}

#[test]
fn test_expiry_boundary() {
    let codec = codec("token-tests-secret");
    let ttl = TimeDelta::seconds(300);
    let issued_at = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
    let issued = codec.issue_at(&subject(), ttl, issued_at).unwrap();
    assert_eq!(issued.expires_at, issued_at + ttl);

    assert!(codec.verify_at(&issued.token, issued_at + ttl).is_ok());
    assert_eq!(
        codec
            .verify_at(&issued.token, issued_at + ttl + TimeDelta::seconds(1))
            .err(),
        Some(Error::TokenExpired)
    );
}

#[test]
fn test_expiry_boundary_with_sub_second_issue_time() {
    let codec = codec("token-tests-secret");
    let ttl = TimeDelta::seconds(300);
    let issued_at =
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap() + TimeDelta::milliseconds(100);
    let issued = codec.issue_at(&subject(), ttl, issued_at).unwrap();
    assert_eq!(issued.expires_at, issued_at + ttl);

    let deadline = issued_at + ttl;
    assert!(codec.verify_at(&issued.token, deadline).is_ok());
    for late in [1, 500, 899] {
        assert_eq!(
            codec
                .verify_at(&issued.token, deadline + TimeDelta::milliseconds(late))
                .err(),
            Some(Error::TokenExpired),
            "accepted {late}ms past expiry"
        );
    }
}

#[test]
fn test_signature_is_checked_before_expiry() {
    let issued_at = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
    let issued = codec("first-secret")
        .issue_at(&subject(), TimeDelta::seconds(1), issued_at)
        .unwrap();

    let later = issued_at + TimeDelta::hours(1);
    let err = codec("second-secret")
        .verify_at(&issued.token, later)
        .unwrap_err();
    assert_eq!(err, Error::TamperedToken);
    assert!(err.is_confirmation_rejected());
}

#[test]
fn test_verified_claims_carry_bindings() {
    let codec = codec("token-tests-secret");
    let issued = codec.issue(&subject(), TimeDelta::seconds(60)).unwrap();
    let verified = codec.verify(&issued.token).unwrap();
    let claims = verified.claims();

    assert_eq!(claims.fnd, subject().finding_id);
    assert_eq!(claims.root, subject().root);
    assert_eq!(claims.path, subject().path);
    assert_eq!(claims.identity(), subject().identity);
}

#[test]
fn test_garbage_tokens_are_tampered() {
    let codec = codec("token-tests-secret");
    for raw in ["", ".", "abc", "abc.def", "!!!.???", " . "] {
        let token: ConfirmationToken = raw.parse().unwrap();
        assert_eq!(codec.verify(&token).err(), Some(Error::TamperedToken), "{raw:?}");
    }
}

#[test]
fn test_token_debug_does_not_leak_contents() {
    let codec = codec("token-tests-secret");
    let issued = codec.issue(&subject(), TimeDelta::seconds(60)).unwrap();
    let shown = format!("{:?}", issued.token);
    assert!(!shown.contains(issued.token.as_str()));
}
