use eyre::Context as _;
use std::process::Command;

const DEV_KEY: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";
const DEV_ADDRESS: &str = "0xf39fd6e51aad88f6f4ce6ab8827279cfffb92266";

fn keyward(cfg: &tempfile::TempDir, data: &tempfile::TempDir) -> Command {
    let exe = assert_cmd::cargo::cargo_bin!("keyward");
    let mut cmd = Command::new(exe);
    cmd.env("KEYWARD_CONFIG_DIR", cfg.path())
        .env("KEYWARD_DATA_DIR", data.path());
    cmd
}

#[test]
fn status_json_runs_and_returns_valid_json() -> eyre::Result<()> {
    let cfg_dir = tempfile::tempdir()?;
    let data_dir = tempfile::tempdir()?;

    let out = keyward(&cfg_dir, &data_dir)
        .args(["status", "--json"])
        .output()
        .context("run keyward status --json")?;

    assert!(
        out.status.success(),
        "status exited non-zero: status={:?}, stderr={}",
        out.status.code(),
        String::from_utf8_lossy(&out.stderr)
    );

    let v: serde_json::Value = serde_json::from_slice(&out.stdout).context("parse status json")?;
    assert_eq!(v.get("ok").and_then(serde_json::Value::as_bool), Some(true));
    assert!(v.get("version").and_then(|x| x.as_str()).is_some());
    assert_eq!(v.get("chain").and_then(|x| x.as_str()), Some("celo"));
    let chains = v
        .get("configured_chains")
        .and_then(|x| x.as_array())
        .cloned()
        .unwrap_or_default();
    assert!(
        chains.iter().any(|c| c.as_str() == Some("celo")),
        "configured chains must include celo: {chains:?}"
    );
    assert_eq!(
        v.get("accounts").and_then(|x| x.as_array()).map(Vec::len),
        Some(0)
    );
    Ok(())
}

#[test]
fn unlock_with_unknown_address_fails() -> eyre::Result<()> {
    let cfg_dir = tempfile::tempdir()?;
    let data_dir = tempfile::tempdir()?;

    let mut unlock = assert_cmd::Command::from_std(keyward(&cfg_dir, &data_dir));
    unlock
        .args(["unlock", "--address", DEV_ADDRESS])
        .write_stdin("whatever\n")
        .assert()
        .failure()
        .stderr(predicates::str::contains("account not found"));
    Ok(())
}

#[test]
fn import_unlock_and_sign_message_round_trip() -> eyre::Result<()> {
    let cfg_dir = tempfile::tempdir()?;
    let data_dir = tempfile::tempdir()?;

    // Import reads the key and the password from stdin when piped.
    let mut import = assert_cmd::Command::from_std(keyward(&cfg_dir, &data_dir));
    import
        .arg("import")
        .write_stdin(format!("{DEV_KEY}\nhunter2\n"))
        .assert()
        .success()
        .stdout(predicates::str::contains(DEV_ADDRESS));

    // The account is persisted: a fresh process lists it, locked.
    let out = keyward(&cfg_dir, &data_dir)
        .args(["status", "--json"])
        .output()
        .context("run keyward status --json")?;
    let v: serde_json::Value = serde_json::from_slice(&out.stdout).context("parse status json")?;
    let accounts = v
        .get("accounts")
        .and_then(|x| x.as_array())
        .cloned()
        .unwrap_or_default();
    assert_eq!(accounts.len(), 1);
    let account = accounts.first().ok_or_else(|| eyre::eyre!("missing account"))?;
    assert_eq!(
        account.get("address").and_then(|x| x.as_str()),
        Some(DEV_ADDRESS)
    );
    assert_eq!(
        account.get("unlocked").and_then(serde_json::Value::as_bool),
        Some(false)
    );

    // Wrong password: the unlock is refused but the command itself succeeds.
    let mut unlock = assert_cmd::Command::from_std(keyward(&cfg_dir, &data_dir));
    unlock
        .arg("unlock")
        .write_stdin("wrong-password\n")
        .assert()
        .success()
        .stdout(predicates::str::contains("\"unlocked\":false"));

    // Unlock + sign in one process; the signature is 65 bytes of hex.
    let mut sign = assert_cmd::Command::from_std(keyward(&cfg_dir, &data_dir));
    let assert = sign
        .args(["sign-message", "--message", "hello keyward"])
        .write_stdin("hunter2\n")
        .assert()
        .success();
    let stdout = String::from_utf8_lossy(&assert.get_output().stdout).into_owned();
    let v: serde_json::Value = serde_json::from_str(stdout.trim()).context("parse sign json")?;
    assert_eq!(v.get("address").and_then(|x| x.as_str()), Some(DEV_ADDRESS));
    let sig = v
        .get("signature")
        .and_then(|x| x.as_str())
        .ok_or_else(|| eyre::eyre!("missing signature"))?;
    assert!(sig.starts_with("0x"), "signature must be 0x-prefixed: {sig}");
    assert_eq!(sig.len(), 132, "expected 65 hex-encoded bytes: {sig}");

    // A wrong password refuses to sign.
    let mut refused = assert_cmd::Command::from_std(keyward(&cfg_dir, &data_dir));
    refused
        .args(["sign-message", "--message", "hello keyward"])
        .write_stdin("wrong-password\n")
        .assert()
        .failure();
    Ok(())
}

#[test]
fn change_password_rotates_the_stored_key() -> eyre::Result<()> {
    let cfg_dir = tempfile::tempdir()?;
    let data_dir = tempfile::tempdir()?;

    let mut import = assert_cmd::Command::from_std(keyward(&cfg_dir, &data_dir));
    import
        .arg("import")
        .write_stdin(format!("{DEV_KEY}\nold-password\n"))
        .assert()
        .success();

    // change-password reads current + new password from stdin.
    let mut rotate = assert_cmd::Command::from_std(keyward(&cfg_dir, &data_dir));
    rotate
        .arg("change-password")
        .write_stdin("old-password\nnew-password\n")
        .assert()
        .success()
        .stdout(predicates::str::contains("\"updated\":true"));

    // Old password no longer unlocks; the new one does.
    let mut old_unlock = assert_cmd::Command::from_std(keyward(&cfg_dir, &data_dir));
    old_unlock
        .arg("unlock")
        .write_stdin("old-password\n")
        .assert()
        .success()
        .stdout(predicates::str::contains("\"unlocked\":false"));

    let mut new_unlock = assert_cmd::Command::from_std(keyward(&cfg_dir, &data_dir));
    new_unlock
        .arg("unlock")
        .write_stdin("new-password\n")
        .assert()
        .success()
        .stdout(predicates::str::contains("\"unlocked\":true"));
    Ok(())
}

#[test]
fn alternate_transport_is_strict() -> eyre::Result<()> {
    let cfg_dir = tempfile::tempdir()?;
    let data_dir = tempfile::tempdir()?;

    // Sepolia ships with no alternate transport configured.
    let out = keyward(&cfg_dir, &data_dir)
        .args(["--chain", "sepolia", "--alternate-transport", "status"])
        .output()
        .context("run keyward status")?;
    assert!(!out.status.success(), "missing alternate must fail");
    let stderr = String::from_utf8_lossy(&out.stderr);
    assert!(
        stderr.contains("no alternate transport configured"),
        "unexpected stderr: {stderr}"
    );

    // An unknown chain fails with the distinct unsupported-chain error.
    let out = keyward(&cfg_dir, &data_dir)
        .args(["--chain", "dogecoin", "status"])
        .output()
        .context("run keyward status")?;
    assert!(!out.status.success(), "unknown chain must fail");
    let stderr = String::from_utf8_lossy(&out.stderr);
    assert!(
        stderr.contains("unsupported chain"),
        "unexpected stderr: {stderr}"
    );
    Ok(())
}
