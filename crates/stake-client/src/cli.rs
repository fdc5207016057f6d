//! Command-line entry points.
//!
//! Each command writes human-readable output to `out` and returns a process
//! exit code, so a thin binary only has to build the transport, load the
//! wallet and call through.

use std::io::Write;

use sol_primitives::Keypair;
use tracing::error;

use crate::config::StakeConfig;
use crate::error::StakeClientError;
use crate::operation::{list_stake_records, StakeClient, StakeReport};
use crate::rpc::LedgerRpc;

/// Parse a decimal token amount into base units.
///
/// `"1.23"` with 6 decimals is `1_230_000`. More fractional digits than the
/// mint has, zero, and values that overflow `u64` are rejected.
pub fn parse_token_amount(text: &str, decimals: u8) -> Result<u64, StakeClientError> {
    let invalid = |why: &str| StakeClientError::InvalidAmount(format!("{text:?}: {why}"));

    let text_trimmed = text.trim();
    let (whole, fraction) = match text_trimmed.split_once('.') {
        Some((w, f)) => (w, f),
        None => (text_trimmed, ""),
    };
    if whole.is_empty() && fraction.is_empty() {
        return Err(invalid("empty amount"));
    }
    if !whole.bytes().all(|b| b.is_ascii_digit()) || !fraction.bytes().all(|b| b.is_ascii_digit())
    {
        return Err(invalid("not a decimal number"));
    }
    if fraction.len() > decimals as usize {
        return Err(invalid(&format!("more than {decimals} decimal places")));
    }

    let scale = 10u64
        .checked_pow(decimals as u32)
        .ok_or_else(|| invalid("mint decimals too large"))?;
    let whole_units = if whole.is_empty() {
        0
    } else {
        whole.parse::<u64>().map_err(|_| invalid("too large"))?
    };
    let fraction_units = if fraction.is_empty() {
        0
    } else {
        let padded = format!("{fraction:0<width$}", width = decimals as usize);
        padded.parse::<u64>().map_err(|_| invalid("too large"))?
    };

    let amount = whole_units
        .checked_mul(scale)
        .and_then(|units| units.checked_add(fraction_units))
        .ok_or_else(|| invalid("too large"))?;
    if amount == 0 {
        return Err(invalid("must be greater than zero"));
    }
    Ok(amount)
}

/// Render base units with the mint's decimals, trimming trailing zeros.
pub fn format_token_amount(amount: u64, decimals: u8) -> String {
    if decimals == 0 {
        return amount.to_string();
    }
    let Some(scale) = 10u64.checked_pow(decimals as u32) else {
        return amount.to_string();
    };
    let whole = amount / scale;
    let fraction = amount % scale;
    if fraction == 0 {
        return whole.to_string();
    }
    let digits = format!("{fraction:0>width$}", width = decimals as usize);
    format!("{whole}.{}", digits.trim_end_matches('0'))
}

/// Print every stake record the configured program owns.
pub fn run_list(rpc: &dyn LedgerRpc, config: &StakeConfig, out: &mut dyn Write) -> i32 {
    let result = (|| -> Result<(), StakeClientError> {
        let records = list_stake_records(rpc, &config.program_id)?;
        writeln!(out, "all stakes:")?;
        for (_, record) in records {
            writeln!(out, "  {} {}", record.owner, record.total)?;
        }
        Ok(())
    })();
    finish(result, out)
}

/// Stake `amount_text` tokens (in whole-token units) and report the outcome.
pub fn run_stake(
    rpc: &dyn LedgerRpc,
    config: &StakeConfig,
    payer: &Keypair,
    amount_text: &str,
    out: &mut dyn Write,
) -> i32 {
    let result = (|| -> Result<(), StakeClientError> {
        let client = StakeClient::new(rpc, config.clone())?;
        let decimals = client.mint_decimals()?;
        let amount = parse_token_amount(amount_text, decimals)?;

        writeln!(out, "cluster: {}", config.cluster.display_name())?;
        writeln!(out, "user: {}", payer.pubkey())?;
        writeln!(out, "mint: {}", config.mint)?;

        let report = client.stake_and_verify(payer, amount)?;
        print_report(&report, decimals, config, &mut *out)
    })();
    finish(result, out)
}

fn print_report(
    report: &StakeReport,
    decimals: u8,
    config: &StakeConfig,
    out: &mut dyn Write,
) -> Result<(), StakeClientError> {
    writeln!(out, "stake tx: {}", report.signature)?;
    for address in &report.created_accounts {
        writeln!(out, "created token account: {address}")?;
    }
    match &report.event {
        Some(observed) => writeln!(
            out,
            "StakeEvent @ slot {}: staker={} mint={} amount={} new_total={}",
            observed.slot,
            observed.event.staker,
            observed.event.mint,
            observed.event.amount,
            observed.event.new_total
        )?,
        None => writeln!(
            out,
            "no StakeEvent observed within {} ms",
            config.event_wait_ms
        )?,
    }
    writeln!(
        out,
        "stake record {}: owner={} mint={} total={} ({} tokens)",
        report.accounts.stake_record,
        report.record.owner,
        report.record.mint,
        report.record.total,
        format_token_amount(report.record.total, decimals)
    )?;
    Ok(())
}

fn finish(result: Result<(), StakeClientError>, out: &mut dyn Write) -> i32 {
    match result {
        Ok(()) => 0,
        Err(e) => {
            error!(error = %e, "command failed");
            let _ = writeln!(out, "error: {e}");
            if e.is_ambiguous() {
                let _ = writeln!(
                    out,
                    "the transaction may still land; check the stake record before retrying"
                );
            }
            e.exit_code()
        }
    }
}
