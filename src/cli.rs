//! CLI implementation for contractctl
//!
//! Provides an operator-facing command-line interface over the contract
//! store. All commands output pretty JSON. With `--admin` the command is
//! sent to a running indexer instead of opening the database.

use crate::config::parse_address;
use crate::records::{ContractRecord, ContractStatus};
use crate::store::{ContractStore, RocksContractStore, UpsertOutcome};
use alloy_primitives::U256;
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::path::PathBuf;

/// Contract store CLI tool
#[derive(Parser)]
#[command(name = "contractctl")]
#[command(about = "Manage the collection contracts watched by the indexer")]
pub struct Cli {
    /// Path to the RocksDB database directory
    #[arg(short, long, default_value = "./sieve_db")]
    db_path: PathBuf,

    /// Chain ID the contracts belong to
    #[arg(short, long, default_value_t = 31337)]
    chain_id: u64,

    /// Admin endpoint of a running indexer (e.g., http://127.0.0.1:9090)
    #[arg(long)]
    admin: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand, Serialize, Deserialize)]
pub enum Commands {
    /// Register a collection contract
    Add {
        /// Contract address (hex, with or without 0x prefix)
        address: String,
        /// Collection name
        #[arg(long, default_value = "")]
        name: String,
        /// Collection symbol
        #[arg(long, default_value = "")]
        symbol: String,
        /// Base token URI
        #[arg(long, default_value = "")]
        base_uri: String,
        /// Creator address (hex)
        #[arg(long)]
        creator: Option<String>,
        /// Collection ID assigned by the factory
        #[arg(long, default_value_t = 0)]
        collection_id: u64,
        /// Generation model ID
        #[arg(long)]
        model_id: Option<u64>,
        /// Network name
        #[arg(long, default_value = "")]
        network: String,
    },
    /// Get a contract record
    Get {
        /// Contract address (hex, with or without 0x prefix)
        address: String,
    },
    /// List contracts
    List {
        /// Only active contracts, newest first
        #[arg(long)]
        active: bool,
    },
    /// Change a contract's status (active, inactive, deleted)
    SetStatus {
        /// Contract address (hex, with or without 0x prefix)
        address: String,
        /// New status
        status: ContractStatus,
    },
    /// Show contract counts
    Stats,
    /// Get the last processed block
    GetHead,
    /// Set the last processed block
    SetHead {
        /// Block number
        block: u64,
    },
}

fn record_json(record: &ContractRecord) -> Value {
    json!({
        "contract_address": format!("0x{:x}", record.contract_address),
        "chain_id": record.chain_id,
        "collection_id": record.collection_id.to_string(),
        "creator": format!("0x{:x}", record.creator),
        "name": record.name,
        "symbol": record.symbol,
        "base_uri": record.base_uri,
        "model_id": record.model_id,
        "network": record.network,
        "status": record.status.as_str(),
        "created_at": record.created_at,
        "updated_at": record.updated_at,
    })
}

fn outcome_str(outcome: UpsertOutcome) -> &'static str {
    match outcome {
        UpsertOutcome::Inserted => "inserted",
        UpsertOutcome::Updated => "updated",
        UpsertOutcome::Unchanged => "unchanged",
    }
}

/// Execute one command against an open store.
pub fn execute(store: &dyn ContractStore, chain_id: u64, command: Commands) -> Result<Value> {
    let result = match command {
        Commands::Add {
            address,
            name,
            symbol,
            base_uri,
            creator,
            collection_id,
            model_id,
            network,
        } => {
            let addr = parse_address(&address)?;
            let mut record = ContractRecord::new(chain_id, addr);
            record.name = name;
            record.symbol = symbol;
            record.base_uri = base_uri;
            record.collection_id = U256::from(collection_id);
            record.model_id = model_id;
            record.network = network;
            if let Some(creator) = creator {
                record.creator = parse_address(&creator)?;
            }
            // Re-adding keeps the current status
            if let Some(existing) = store.get_contract(chain_id, addr)? {
                record.status = existing.status;
            }
            let outcome = store.upsert_contract(&record)?;
            json!({
                "status": "ok",
                "result": outcome_str(outcome),
                "contract_address": format!("0x{:x}", addr),
            })
        }
        Commands::Get { address } => {
            let addr = parse_address(&address)?;
            match store.get_contract(chain_id, addr)? {
                Some(record) => json!({ "contract": record_json(&record) }),
                None => json!({
                    "contract_address": format!("0x{:x}", addr),
                    "contract": null
                }),
            }
        }
        Commands::List { active } => {
            let records = if active {
                store.active_contracts(chain_id)?
            } else {
                store.list_contracts(chain_id)?
            };
            let contracts: Vec<Value> = records.iter().map(record_json).collect();
            json!({
                "chain_id": chain_id,
                "count": contracts.len(),
                "contracts": contracts,
            })
        }
        Commands::SetStatus { address, status } => {
            let addr = parse_address(&address)?;
            if !store.set_status(chain_id, addr, status)? {
                anyhow::bail!("Contract 0x{:x} not found on chain {}", addr, chain_id);
            }
            json!({
                "status": "ok",
                "contract_address": format!("0x{:x}", addr),
                "contract_status": status.as_str(),
            })
        }
        Commands::Stats => {
            let stats = store.stats(chain_id)?;
            json!({
                "chain_id": chain_id,
                "total_contracts": stats.total_contracts,
                "active_contracts": stats.active_contracts,
            })
        }
        Commands::GetHead => match store.get_head()? {
            Some(block) => json!({ "head_block": block }),
            None => json!({ "head_block": null }),
        },
        Commands::SetHead { block } => {
            store.set_head(block)?;
            json!({ "status": "ok", "head_block": block })
        }
    };
    Ok(result)
}

/// Run the CLI command and print JSON output.
pub fn run() -> Result<()> {
    let cli = Cli::parse();

    let result = match cli.admin {
        Some(url) => {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .context("Failed to start async runtime")?;
            runtime.block_on(crate::admin::send_command(&url, cli.chain_id, cli.command))?
        }
        None => {
            let store = RocksContractStore::open(&cli.db_path)
                .with_context(|| format!("Failed to open database at {:?}", cli.db_path))?;
            execute(&store, cli.chain_id, cli.command)?
        }
    };

    // Pretty print JSON
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const ADDR: &str = "0x0742d35Cc6634C0532925a3b844Bc9e7595f0bEb";

    fn add(address: &str, name: &str) -> Commands {
        Commands::Add {
            address: address.to_string(),
            name: name.to_string(),
            symbol: String::new(),
            base_uri: String::new(),
            creator: None,
            collection_id: 4,
            model_id: Some(2),
            network: "localhost".to_string(),
        }
    }

    #[test]
    fn test_cli_parses_set_status() {
        let cli = Cli::try_parse_from([
            "contractctl",
            "--chain-id",
            "84532",
            "set-status",
            ADDR,
            "deleted",
        ])
        .unwrap();
        assert_eq!(cli.chain_id, 84532);
        assert!(cli.admin.is_none());
        assert!(matches!(
            cli.command,
            Commands::SetStatus {
                status: ContractStatus::Deleted,
                ..
            }
        ));
    }

    #[test]
    fn test_cli_parses_admin_url() {
        let cli = Cli::try_parse_from([
            "contractctl",
            "--admin",
            "http://127.0.0.1:9090",
            "set-head",
            "12",
        ])
        .unwrap();
        assert_eq!(cli.admin.as_deref(), Some("http://127.0.0.1:9090"));
        assert!(matches!(cli.command, Commands::SetHead { block: 12 }));
    }

    #[test]
    fn test_add_get_and_list() {
        let temp_dir = TempDir::new().unwrap();
        let store = RocksContractStore::open(temp_dir.path()).unwrap();

        let added = execute(&store, 1, add(ADDR, "Cats")).unwrap();
        assert_eq!(added["result"], "inserted");
        let again = execute(&store, 1, add(ADDR, "Cats")).unwrap();
        assert_eq!(again["result"], "unchanged");

        let got = execute(&store, 1, Commands::Get { address: ADDR.to_string() }).unwrap();
        assert_eq!(got["contract"]["name"], "Cats");
        assert_eq!(got["contract"]["collection_id"], "4");
        assert_eq!(
            got["contract"]["contract_address"],
            "0x0742d35cc6634c0532925a3b844bc9e7595f0beb"
        );

        let listed = execute(&store, 1, Commands::List { active: false }).unwrap();
        assert_eq!(listed["count"], 1);
        let other_chain = execute(&store, 2, Commands::List { active: false }).unwrap();
        assert_eq!(other_chain["count"], 0);
    }

    #[test]
    fn test_set_status_and_stats() {
        let temp_dir = TempDir::new().unwrap();
        let store = RocksContractStore::open(temp_dir.path()).unwrap();
        execute(&store, 1, add(ADDR, "Cats")).unwrap();

        let updated = execute(
            &store,
            1,
            Commands::SetStatus {
                address: ADDR.to_string(),
                status: ContractStatus::Inactive,
            },
        )
        .unwrap();
        assert_eq!(updated["contract_status"], "inactive");

        // Re-adding does not reactivate
        execute(&store, 1, add(ADDR, "Cats v2")).unwrap();
        let stats = execute(&store, 1, Commands::Stats).unwrap();
        assert_eq!(stats["total_contracts"], 1);
        assert_eq!(stats["active_contracts"], 0);

        let missing = execute(
            &store,
            1,
            Commands::SetStatus {
                address: "0x0000000000000000000000000000000000000001".to_string(),
                status: ContractStatus::Deleted,
            },
        );
        assert!(missing.is_err());
    }

    #[test]
    fn test_head_commands() {
        let temp_dir = TempDir::new().unwrap();
        let store = RocksContractStore::open(temp_dir.path()).unwrap();

        let empty = execute(&store, 1, Commands::GetHead).unwrap();
        assert!(empty["head_block"].is_null());
        execute(&store, 1, Commands::SetHead { block: 99 }).unwrap();
        let head = execute(&store, 1, Commands::GetHead).unwrap();
        assert_eq!(head["head_block"], 99);
    }
}
