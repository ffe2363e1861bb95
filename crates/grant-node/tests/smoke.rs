//! End-to-end smoke test for grant-node.
//!
//! Starts a real node process against a fresh database, drives it through
//! a full grant → voucher → claim → invoice → payment lifecycle purely via
//! JSON-RPC, and asserts the projections it returns along the way.
//!
//! Run with:
//!   cargo test -p grant-node --test smoke

use std::net::TcpListener;
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};

use serde_json::{json, Value};
use uuid::Uuid;

struct NodeGuard {
    child: Child,
    data_dir: PathBuf,
}

impl Drop for NodeGuard {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
        let _ = std::fs::remove_dir_all(&self.data_dir);
    }
}

fn free_port() -> u16 {
    TcpListener::bind("127.0.0.1:0").unwrap().local_addr().unwrap().port()
}

async fn rpc_call(client: &reqwest::Client, url: &str, method: &str, params: Value) -> Value {
    let body = json!({ "jsonrpc": "2.0", "method": method, "params": [params], "id": 1 });
    let resp = client
        .post(url)
        .json(&body)
        .send()
        .await
        .unwrap_or_else(|e| panic!("RPC call {method} failed: {e}"));
    let json: Value = resp.json().await.expect("parse RPC JSON");
    if let Some(err) = json.get("error") {
        panic!("RPC error from {method}: {err}");
    }
    json["result"].clone()
}

async fn wait_for_rpc(client: &reqwest::Client, url: &str, timeout: Duration) -> bool {
    let body = json!({ "jsonrpc": "2.0", "method": "grant_getVersion", "params": [], "id": 1 });
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if let Ok(resp) = client.post(url).json(&body).send().await {
            if resp.status().is_success() {
                return true;
            }
        }
        tokio::time::sleep(Duration::from_millis(250)).await;
    }
    false
}

fn trace(idempotency_key: &str) -> Value {
    json!({
        "idempotency_key": idempotency_key,
        "actor_id": Uuid::new_v4(),
        "actor_type": "TEST",
        "correlation_id": Uuid::new_v4(),
        "causation_id": null,
    })
}

#[tokio::test]
async fn smoke_grant_voucher_claim_invoice_payment() {
    // ── 1. Start node ─────────────────────────────────────────────────────────
    let data_dir = std::env::temp_dir().join(format!("grant_node_e2e_{}", std::process::id()));
    let _ = std::fs::remove_dir_all(&data_dir);
    std::fs::create_dir_all(&data_dir).unwrap();

    let rpc_port = free_port();
    let rpc_url = format!("http://127.0.0.1:{rpc_port}");

    let node_bin = env!("CARGO_BIN_EXE_grant-node");
    let child = Command::new(node_bin)
        .args([
            "--data-dir", data_dir.join("state").to_str().unwrap(),
            "--rpc-addr", &format!("127.0.0.1:{rpc_port}"),
            "--sweep-interval-secs", "3600",
        ])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .expect("failed to spawn grant-node");

    let _guard = NodeGuard { child, data_dir };

    let http = reqwest::Client::new();
    assert!(
        wait_for_rpc(&http, &rpc_url, Duration::from_secs(20)).await,
        "grant-node did not become ready within 20 seconds"
    );

    // ── 2. Create, sign, activate a grant ─────────────────────────────────────
    let grant_id = Uuid::new_v4();
    let grant_cycle_id = Uuid::new_v4();

    rpc_call(
        &http,
        &rpc_url,
        "grant_createGrant",
        json!({
            "trace": trace("create-grant-1"),
            "grant_id": grant_id,
            "grant_cycle_id": grant_cycle_id,
            "buckets": [{
                "bucket": "GENERAL",
                "awarded": "10000.00",
                "rate_numerator_cents": 1,
                "rate_denominator_cents": 1,
            }],
        }),
    )
    .await;

    rpc_call(&http, &rpc_url, "grant_signGrantAgreement", json!({"trace": trace("sign-1"), "grant_id": grant_id})).await;
    rpc_call(&http, &rpc_url, "grant_activateGrant", json!({"trace": trace("activate-1"), "grant_id": grant_id})).await;

    let grant = rpc_call(&http, &rpc_url, "grant_getGrant", json!(grant_id)).await;
    assert_eq!(grant["status"], "Active");

    // ── 3. Issue a voucher online (code allocated immediately) ────────────────
    let voucher_id = Uuid::new_v4();
    let clinic_id = Uuid::new_v4();
    let now = chrono::Utc::now();

    let issued = rpc_call(
        &http,
        &rpc_url,
        "grant_issueVoucherOnline",
        json!({
            "trace": trace("issue-voucher-1"),
            "voucher_id": voucher_id,
            "grant_id": grant_id,
            "bucket": "GENERAL",
            "clinic_id": clinic_id,
            "county_code": "MERCED",
            "max_reimbursement": "150.00",
            "is_lirp": false,
            "valid_from": now,
            "expires_at": now + chrono::Duration::days(30),
        }),
    )
    .await;
    assert!(issued["voucher_code"].is_string(), "online issuance should allocate a voucher code immediately");

    let voucher = rpc_call(&http, &rpc_url, "grant_getVoucher", json!(voucher_id)).await;
    assert_eq!(voucher["status"], "Issued");

    // ── 4. Submit and approve a claim against the voucher ──────────────────────
    let claim_id = Uuid::new_v4();
    let submitted = rpc_call(
        &http,
        &rpc_url,
        "grant_submitClaim",
        json!({
            "trace": trace("submit-claim-1"),
            "claim_id": claim_id,
            "voucher_id": voucher_id,
            "procedure_code": "SN-DOG",
            "date_of_service": now,
            "rabies_flag": false,
            "charge_amount": "150.00",
            "co_pay": "0.00",
            "grant_period_start": now - chrono::Duration::days(1),
            "grant_period_end": now + chrono::Duration::days(60),
            "claim_submission_deadline": now + chrono::Duration::days(90),
        }),
    )
    .await;
    assert!(submitted["duplicate_of"].is_null());

    let decided = rpc_call(
        &http,
        &rpc_url,
        "grant_approveClaim",
        json!({
            "trace": trace("approve-claim-1"),
            "claim_id": claim_id,
            "decided_by": Uuid::new_v4(),
            "policy_snapshot_id": Uuid::new_v4(),
            "reason": null,
        }),
    )
    .await;
    assert_eq!(decided["conflict"], false);

    // ── 5. Generate, submit, and pay the monthly invoice ───────────────────────
    let run_at = now + chrono::Duration::minutes(1);
    let invoice_ids = rpc_call(
        &http,
        &rpc_url,
        "grant_generateMonthlyInvoices",
        json!({
            "trace": trace("generate-invoices-1"),
            "grant_cycle_id": grant_cycle_id,
            "year": run_at.format("%Y").to_string().parse::<i32>().unwrap(),
            "month": run_at.format("%m").to_string().parse::<u32>().unwrap(),
            "watermark_ingested_at": run_at,
            "watermark_event_id": Uuid::max(),
            "clinic_ids": [clinic_id],
        }),
    )
    .await;
    let invoice_id = invoice_ids.as_array().unwrap()[0].clone();

    rpc_call(&http, &rpc_url, "grant_submitInvoice", json!({"trace": trace("submit-invoice-1"), "invoice_id": invoice_id})).await;

    rpc_call(
        &http,
        &rpc_url,
        "grant_recordPayment",
        json!({
            "trace": trace("record-payment-1"),
            "payment_id": Uuid::new_v4(),
            "invoice_id": invoice_id,
            "amount": "150.00",
            "channel": "ACH",
            "reference": "batch-1",
        }),
    )
    .await;

    let invoice_view = rpc_call(&http, &rpc_url, "grant_getInvoice", json!(invoice_id)).await;
    assert_eq!(invoice_view["payment_status"], "Paid");
    assert_eq!(invoice_view["invoice"]["total"], "150.00");
}
