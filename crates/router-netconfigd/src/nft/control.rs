//! Packet filter capability and its `nft` implementation.

use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use tracing::debug;

use router_cfgmgr_common::shell::{self, shellquote, ExecResult, NFT_CMD};
use router_cfgmgr_common::{CfgMgrError, CfgMgrResult};

use super::render::render_batch;
use super::ruleset::{Batch, CounterValue, Table};

/// Access to the kernel packet filter.
#[async_trait]
pub trait PacketFilter: Send + Sync {
    /// Reads a counter object. Returns `Ok(None)` if it does not exist.
    async fn counter(&self, table: &Table, name: &str) -> CfgMgrResult<Option<CounterValue>>;

    /// Applies a batch as a single transaction: either every change takes
    /// effect or none does.
    async fn commit(&self, batch: &Batch) -> CfgMgrResult<()>;
}

/// What `nft` reports for a table or object that does not exist.
const NO_SUCH_OBJECT: &str = "No such file or directory";

/// `nft` exit status for a command the kernel rejected.
const NFT_EXIT_FAILURE: i32 = 1;

#[derive(Debug, Deserialize)]
struct NftOutput {
    #[serde(default)]
    nftables: Vec<HashMap<String, serde_json::Value>>,
}

#[derive(Debug, Deserialize)]
struct NftCounter {
    name: String,
    table: String,
    #[serde(default)]
    packets: u64,
    #[serde(default)]
    bytes: u64,
}

/// Extracts one counter from `nft -j list counter` output.
pub fn parse_counter(json: &str, table: &Table, name: &str) -> CfgMgrResult<Option<CounterValue>> {
    let output: NftOutput =
        serde_json::from_str(json).map_err(|e| CfgMgrError::json("nft -j list counter", e))?;

    for object in output.nftables {
        let Some(value) = object.get("counter") else {
            continue;
        };
        let counter: NftCounter = serde_json::from_value(value.clone())
            .map_err(|e| CfgMgrError::json("nft -j list counter", e))?;
        if counter.table == table.name && counter.name == name {
            return Ok(Some(CounterValue {
                packets: counter.packets,
                bytes: counter.bytes,
            }));
        }
    }
    Ok(None)
}

/// Drives the packet filter through the `nft` command.
#[derive(Debug, Clone, Copy, Default)]
pub struct NftControl;

impl NftControl {
    /// Creates a new `nft`-backed packet filter.
    pub fn new() -> Self {
        Self
    }
}

/// Interprets the outcome of `nft -j list counter`. A missing table or
/// counter (first start) is `Ok(None)`; any other failure is an error.
fn counter_from_result(
    cmd: &str,
    result: ExecResult,
    table: &Table,
    name: &str,
) -> CfgMgrResult<Option<CounterValue>> {
    // A shell that cannot find nft exits 127 with a similar message.
    if result.exit_code == NFT_EXIT_FAILURE && result.stderr.contains(NO_SUCH_OBJECT) {
        debug!("{}: {}", cmd, result.stderr);
        return Ok(None);
    }
    let stdout = result.into_stdout(cmd)?;
    parse_counter(&stdout, table, name)
}

#[async_trait]
impl PacketFilter for NftControl {
    async fn counter(&self, table: &Table, name: &str) -> CfgMgrResult<Option<CounterValue>> {
        let cmd = format!(
            "{} -j list counter {} {} {}",
            NFT_CMD,
            table.family_keyword(),
            shellquote(&table.name),
            shellquote(name)
        );
        counter_from_result(&cmd, shell::exec(&cmd).await?, table, name)
    }

    async fn commit(&self, batch: &Batch) -> CfgMgrResult<()> {
        let script = render_batch(batch)?;
        shell::exec_with_input(&format!("{} -f -", NFT_CMD), &script)
            .await
            .map_err(|e| CfgMgrError::netfilter("commit", e.to_string()))?;
        Ok(())
    }
}
