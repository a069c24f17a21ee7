use clap::{Parser, Subcommand};
use serde_json::{json, Value};

const PRIVATE_KEY_ENV_VAR: &str = "WITHDRAW_PRIVATE_KEY";

#[derive(Parser)]
#[command(name = "withdraw-cli")]
#[command(about = "Client for the withdrawal orchestrator API", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://localhost:5000")]
    url: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check service and chain connectivity
    Health,
    /// Show the next nonce for an address
    Nonce { address: String },
    /// Check a nonce against the pending count
    ValidateNonce { address: String, nonce: u64 },
    /// Build an unsigned transfer and show its cost
    Create {
        #[arg(long)]
        from: String,
        #[arg(long)]
        to: String,
        #[arg(long)]
        amount: String,
    },
    /// Sign and broadcast a transfer (key from WITHDRAW_PRIVATE_KEY)
    Withdraw {
        #[arg(long)]
        from: String,
        #[arg(long)]
        to: String,
        #[arg(long)]
        amount: String,
        #[arg(long)]
        nonce: Option<u64>,
        /// Return right after broadcast
        #[arg(long)]
        no_wait: bool,
        #[arg(long)]
        timeout_secs: Option<u64>,
    },
    /// Poll a submitted transfer
    Tx { hash: String },
    /// Re-check a timed-out transfer against the chain
    Reconcile { hash: String },
    /// Replace a reconciled, still-pending transfer with higher fees
    SpeedUp { hash: String },
    /// Two-phase warehouse withdrawals
    #[command(subcommand)]
    Warehouse(WarehouseCommands),
}

#[derive(Subcommand)]
enum WarehouseCommands {
    /// Start a withdrawal job
    Start {
        #[arg(long)]
        source: String,
        #[arg(long)]
        destination: String,
        #[arg(long)]
        amount: String,
        #[arg(long)]
        warehouse: Option<String>,
        #[arg(long)]
        wait: bool,
    },
    /// List all jobs
    List,
    /// Show one job
    Get { id: String },
    /// Continue a job from its persisted phase
    Resume { id: String },
    /// Re-check a stopped job's submitted leg
    Reconcile { id: String },
    /// Cancel a job that has nothing on chain
    Cancel { id: String },
}

fn private_key() -> Result<String, Box<dyn std::error::Error>> {
    std::env::var(PRIVATE_KEY_ENV_VAR)
        .map_err(|_| format!("{PRIVATE_KEY_ENV_VAR} must be set for this command").into())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client = reqwest::Client::new();
    let base = cli.url.trim_end_matches('/').to_string();

    let res = match cli.command {
        Commands::Health => client.get(format!("{base}/health")).send().await?,
        Commands::Nonce { address } => client.get(format!("{base}/nonce/{address}")).send().await?,
        Commands::ValidateNonce { address, nonce } => {
            client
                .post(format!("{base}/validate-nonce"))
                .json(&json!({ "address": address, "nonce": nonce }))
                .send()
                .await?
        }
        Commands::Create { from, to, amount } => {
            client
                .post(format!("{base}/create-transaction"))
                .json(&json!({ "from_address": from, "to_address": to, "amount_eth": amount }))
                .send()
                .await?
        }
        Commands::Withdraw {
            from,
            to,
            amount,
            nonce,
            no_wait,
            timeout_secs,
        } => {
            let body = json!({
                "from_address": from,
                "to_address": to,
                "amount_eth": amount,
                "private_key": private_key()?,
                "wait_for_confirmation": !no_wait,
                "nonce": nonce,
                "timeout_secs": timeout_secs,
            });
            client
                .post(format!("{base}/execute-withdrawal"))
                .json(&body)
                .send()
                .await?
        }
        Commands::Tx { hash } => client.get(format!("{base}/transactions/{hash}")).send().await?,
        Commands::Reconcile { hash } => {
            client
                .post(format!("{base}/transactions/{hash}/reconcile"))
                .send()
                .await?
        }
        Commands::SpeedUp { hash } => {
            client
                .post(format!("{base}/transactions/{hash}/speed-up"))
                .json(&json!({ "private_key": private_key()? }))
                .send()
                .await?
        }
        Commands::Warehouse(cmd) => warehouse(&client, &base, cmd).await?,
    };

    print_response(res).await
}

async fn warehouse(
    client: &reqwest::Client,
    base: &str,
    cmd: WarehouseCommands,
) -> Result<reqwest::Response, Box<dyn std::error::Error>> {
    let jobs = format!("{base}/warehouse/withdrawals");
    let res = match cmd {
        WarehouseCommands::Start {
            source,
            destination,
            amount,
            warehouse,
            wait,
        } => {
            let body = json!({
                "source_address": source,
                "destination_address": destination,
                "warehouse_address": warehouse,
                "amount_eth": amount,
                "private_key": private_key()?,
                "wait": wait,
            });
            client.post(&jobs).json(&body).send().await?
        }
        WarehouseCommands::List => client.get(&jobs).send().await?,
        WarehouseCommands::Get { id } => client.get(format!("{jobs}/{id}")).send().await?,
        WarehouseCommands::Resume { id } => {
            client
                .post(format!("{jobs}/{id}/resume"))
                .json(&json!({ "private_key": private_key()? }))
                .send()
                .await?
        }
        WarehouseCommands::Reconcile { id } => {
            client.post(format!("{jobs}/{id}/reconcile")).send().await?
        }
        WarehouseCommands::Cancel { id } => client.post(format!("{jobs}/{id}/cancel")).send().await?,
    };
    Ok(res)
}

async fn print_response(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    let text = res.text().await?;
    if !status.is_success() {
        eprintln!("Error: API returned status {}", status);
    }

    match serde_json::from_str::<Value>(&text) {
        Ok(json) => println!("{}", serde_json::to_string_pretty(&json)?),
        Err(_) => println!("{}", text),
    }

    if !status.is_success() {
        std::process::exit(1);
    }
    Ok(())
}
