//! Snapshot tests for operator-facing messages

use fwbank_update::prelude::*;
use fwbank_update::transport::{TransportError, TransportOperation};
use fwbank_update::version::{EncodeError, ParseVersionError};
use std::time::Duration;

fn psu_pair() -> Result<BankPair, BankError> {
    BankPair::new(
        UpdateTarget::new("PSU 1", DeviceClass::Psu),
        FirmwareBank::new(Bank::A, true, Some(StructuredVersion::new(1, 2, 3, 10, 0, 255))),
        FirmwareBank::new(Bank::B, false, None),
    )
}

#[test]
fn test_decode_error_messages() {
    let too_short = VersionLayout::PSU.decode(&["31", "30", "30"]);
    insta::assert_snapshot!(
        too_short.err().map(|e| e.to_string()).unwrap_or_default(),
        @"raw version too short: layout requires 8 tokens, got 3"
    );

    let invalid = VersionLayout::PSU.decode(&["30", "31", "zz", "32", "01", "02", "03", "04"]);
    insta::assert_snapshot!(
        invalid.err().map(|e| e.to_string()).unwrap_or_default(),
        @r#"invalid hex token "zz" at index 2 (field minor)"#
    );

    let non_digit = VersionLayout::PSU.decode(&["30", "41", "30", "32", "01", "02", "03", "04"]);
    insta::assert_snapshot!(
        non_digit.err().map(|e| e.to_string()).unwrap_or_default(),
        @"byte 0x41 at index 1 is not an ASCII digit (field major)"
    );
}

#[test]
fn test_encode_and_parse_error_messages() {
    let encoded = VersionLayout::PSU.encode_raw(&StructuredVersion::new(100, 0, 0, 0, 0, 0));
    assert!(matches!(encoded, Err(EncodeError::FieldOutOfRange { value: 100, .. })));
    insta::assert_snapshot!(
        encoded.err().map(|e| e.to_string()).unwrap_or_default(),
        @"field major value 100 exceeds encoded maximum 99"
    );

    let parsed = "1.2".parse::<StructuredVersion>();
    assert!(matches!(parsed, Err(ParseVersionError::Malformed(_))));
    insta::assert_snapshot!(
        parsed.err().map(|e| e.to_string()).unwrap_or_default(),
        @r#"malformed version string "1.2""#
    );
}

#[test]
fn test_bank_error_messages() {
    let ambiguous = BankError::AmbiguousActive {
        target: "PSU 1".to_string(),
        active_count: 2,
    };
    insta::assert_snapshot!(
        ambiguous.to_string(),
        @"Active bank of PSU 1 is indeterminate: 2 banks report active"
    );

    let decode = BankError::Decode {
        target: "PSU 1".to_string(),
        bank: Bank::A,
        source: DecodeError::TooShort {
            required: 8,
            actual: 3,
        },
    };
    insta::assert_snapshot!(
        decode.to_string(),
        @"Bank A of PSU 1 reported an undecodable version: raw version too short: layout requires 8 tokens, got 3"
    );
}

#[test]
fn test_update_error_messages() {
    let active = UpdateError::TargetBankActive {
        target: "PSU 1".to_string(),
        bank: Bank::A,
    };
    insta::assert_snapshot!(
        active.to_string(),
        @"Refusing to update bank A of PSU 1: it is the active bank"
    );

    let baseline = UpdateError::MissingBaseline {
        expectation: Expectation::Newer,
    };
    insta::assert_snapshot!(
        baseline.to_string(),
        @"Cannot check for a newer version: active bank has no known version"
    );

    let initiate = UpdateError::Initiate {
        target: "BMC".to_string(),
        bank: Bank::B,
        source: TransportError::new(TransportOperation::InitiateUpdate, "device busy"),
    };
    insta::assert_snapshot!(
        initiate.to_string(),
        @"Failed to initiate update of bank B on BMC: initiate update failed: device busy"
    );
}

#[test]
fn test_outcome_messages() -> Result<(), BankError> {
    let timed_out = UpdateOutcome::TimedOut {
        waited: Duration::from_secs(600),
        last_state: Some(DeviceState::Updating),
        last_error: None,
    };
    insta::assert_snapshot!(
        timed_out.to_string(),
        @"timed out after 600s (last state Updating)"
    );

    let push_failed = UpdateOutcome::PushFailed {
        attempts: 3,
        last_error: TransportError::new(TransportOperation::PushImage, "connection reset"),
    };
    insta::assert_snapshot!(
        push_failed.to_string(),
        @"push failed after 3 attempts: push image failed: connection reset"
    );

    let mismatch = UpdateOutcome::VersionMismatch {
        expectation: Expectation::Newer,
        baseline: Some(StructuredVersion::new(1, 2, 0, 0, 0, 0)),
        actual: Some(StructuredVersion::new(1, 2, 0, 0, 0, 0)),
        expected_bank: Bank::B,
        active_bank: Bank::A,
        pair: psu_pair()?,
    };
    insta::assert_snapshot!(
        mismatch.to_string(),
        @"version mismatch: expected newer in bank B, bank A active with 1.2.0x00000000"
    );

    let cancelled = UpdateOutcome::Cancelled {
        during: AttemptState::Polling,
    };
    insta::assert_snapshot!(cancelled.to_string(), @"cancelled during Polling");
    insta::assert_snapshot!(
        serde_json::to_string(&cancelled).unwrap_or_default(),
        @r#"{"outcome":"cancelled","during":"Polling"}"#
    );
    Ok(())
}

#[test]
fn test_version_and_pair_display() -> Result<(), BankError> {
    let version = StructuredVersion::new(1, 2, 3, 10, 0, 255);
    insta::assert_snapshot!(version.to_string(), @"1.2.0x030A00FF");
    insta::assert_snapshot!(
        Expectation::Exactly(version).to_string(),
        @"exactly 1.2.0x030A00FF"
    );
    insta::assert_snapshot!(psu_pair()?.to_string(), @"PSU 1: ImageA*=1.2.0x030A00FF ImageB=empty");

    let bmc = BankPair::new(
        UpdateTarget::new("BMC", DeviceClass::Bmc),
        FirmwareBank::new(Bank::A, false, Some(StructuredVersion::new(4, 0, 0, 0, 0, 0))),
        FirmwareBank::new(Bank::B, true, Some(StructuredVersion::new(4, 1, 0, 0, 0, 1))),
    )?;
    insta::assert_snapshot!(
        bmc.to_string(),
        @"BMC: Primary=4.0.0x00000000 Secondary*=4.1.0x00000001"
    );
    Ok(())
}
