use std::collections::VecDeque;

use anonymous_survey::config::{DEFAULT_DATABASE_URL, DEFAULT_MAX_CONNECTIONS};
use anonymous_survey::crypto::{hash_from_hex, hash_to_hex};
use anonymous_survey::domain::MerkleProof;
use anonymous_survey::infra::{commitment, sqlite};
use anonymous_survey::telemetry::{init_tracing, TelemetryConfig};
use anonymous_survey::Hash256;

fn print_help() {
    eprintln!(
        "\
survey-admin

USAGE:
  survey-admin <command> [options]

COMMANDS:
  migrate                         Run database migrations
  merkle-root                     Compute the Merkle root of a commitment list
  prove                           Build an inclusion proof for one commitment
  verify-proof                    Verify an inclusion proof
  final-root                      Compute a final root over campaign roots

migrate OPTIONS:
  --database-url <sqlite_url>     (defaults to env DATABASE_URL, then sqlite://survey.db)

merkle-root OPTIONS:
  --commitments <path>            (required) File with one hex commitment per line

prove OPTIONS:
  --commitments <path>            (required) File with one hex commitment per line
  --target <hex>                  (required) Commitment to prove

verify-proof OPTIONS:
  --commitment <hex>              (required) Hex-encoded commitment
  --root <hex>                    (required) Hex-encoded Merkle root
  --proof <json>                  (required) Proof as printed by `prove`

final-root OPTIONS:
  --roots <hex,hex,...>           (required) Comma-separated campaign roots, in order
"
    );
}

fn take_value(args: &mut VecDeque<String>, flag: &str) -> anyhow::Result<String> {
    args.pop_front()
        .ok_or_else(|| anyhow::anyhow!("missing value for {flag}"))
}

fn parse_hash(label: &str, raw: &str) -> anyhow::Result<Hash256> {
    hash_from_hex(raw.trim()).map_err(|e| anyhow::anyhow!("invalid {label}: {e}"))
}

fn read_commitments(path: &str) -> anyhow::Result<Vec<Hash256>> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("failed to read {path}: {e}"))?;
    contents
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(n, line)| parse_hash(&format!("commitment on line {}", n + 1), line))
        .collect()
}

/// Parses `--flag value` pairs for flags in `known`; `-h` prints help and returns `None`.
fn parse_flags(
    args: &mut VecDeque<String>,
    known: &[&str],
) -> anyhow::Result<Option<Vec<(String, String)>>> {
    let mut values = Vec::new();
    while let Some(arg) = args.pop_front() {
        match arg.as_str() {
            "-h" | "--help" => {
                print_help();
                return Ok(None);
            }
            flag if known.contains(&flag) => {
                let value = take_value(args, flag)?;
                values.push((flag.to_string(), value));
            }
            other => anyhow::bail!("unexpected argument: {other}"),
        }
    }
    Ok(Some(values))
}

fn flag(values: &[(String, String)], name: &str) -> Option<String> {
    values
        .iter()
        .rev()
        .find(|(k, _)| k == name)
        .map(|(_, v)| v.clone())
}

fn required(values: &[(String, String)], name: &str) -> anyhow::Result<String> {
    flag(values, name).ok_or_else(|| anyhow::anyhow!("{name} is required"))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = init_tracing(&TelemetryConfig::from_env());

    let mut args: VecDeque<String> = std::env::args().skip(1).collect();
    let Some(command) = args.pop_front() else {
        print_help();
        return Ok(());
    };

    match command.as_str() {
        "-h" | "--help" | "help" => {
            print_help();
            Ok(())
        }
        "migrate" => {
            let Some(values) = parse_flags(&mut args, &["--database-url"])? else {
                return Ok(());
            };
            let database_url = flag(&values, "--database-url")
                .or_else(|| std::env::var("DATABASE_URL").ok())
                .unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string());

            let pool = sqlite::connect(&database_url, DEFAULT_MAX_CONNECTIONS).await?;
            anonymous_survey::migrations::run_sqlite(&pool).await?;
            println!("ok: migrations applied");
            Ok(())
        }
        "merkle-root" => {
            let Some(values) = parse_flags(&mut args, &["--commitments"])? else {
                return Ok(());
            };
            let leaves = read_commitments(&required(&values, "--commitments")?)?;
            let tree = commitment::MerkleTree::build(&leaves)?;
            println!("root: {}", hash_to_hex(&tree.root()));
            println!("leaves: {}", tree.leaf_count());
            println!("depth: {}", tree.depth());
            Ok(())
        }
        "prove" => {
            let Some(values) = parse_flags(&mut args, &["--commitments", "--target"])? else {
                return Ok(());
            };
            let leaves = read_commitments(&required(&values, "--commitments")?)?;
            let target = parse_hash("--target", &required(&values, "--target")?)?;
            let proof = commitment::prove(&leaves, &target)?;
            println!("{}", serde_json::to_string_pretty(&proof)?);
            Ok(())
        }
        "verify-proof" => {
            let Some(values) =
                parse_flags(&mut args, &["--commitment", "--root", "--proof"])?
            else {
                return Ok(());
            };
            let leaf = parse_hash("--commitment", &required(&values, "--commitment")?)?;
            let root = parse_hash("--root", &required(&values, "--root")?)?;
            let proof: MerkleProof = serde_json::from_str(&required(&values, "--proof")?)
                .map_err(|e| anyhow::anyhow!("invalid --proof JSON: {e}"))?;

            if commitment::verify_proof(&leaf, &proof, &root) {
                println!("ok: proof valid");
                Ok(())
            } else {
                anyhow::bail!("proof invalid")
            }
        }
        "final-root" => {
            let Some(values) = parse_flags(&mut args, &["--roots"])? else {
                return Ok(());
            };
            let roots = required(&values, "--roots")?
                .split(',')
                .filter(|s| !s.trim().is_empty())
                .map(|s| parse_hash("campaign root", s))
                .collect::<anyhow::Result<Vec<_>>>()?;
            let root = commitment::final_root(&roots)?;
            println!("final_root: {}", hash_to_hex(&root));
            println!("campaigns: {}", roots.len());
            Ok(())
        }
        other => {
            print_help();
            anyhow::bail!("unknown command: {other}")
        }
    }
}
