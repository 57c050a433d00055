use std::{path::PathBuf, process};

use structopt::StructOpt;
use tokio::signal;
use tracing_subscriber::FmtSubscriber;

use addshare_core::{
    crypto::PublicKey,
    ledger::RoundLedger,
    message::ParticipantId,
    transport::{HttpTransport, Retrying},
};
use addshare_participant::{
    rest,
    settings::Settings,
    state_machine::{participant::ParticipantState, StateMachine},
    traits::NoopTrainer,
};

#[macro_use]
extern crate tracing;

#[derive(Debug, StructOpt)]
#[structopt(name = "Participant")]
struct Opt {
    /// Path of the configuration file
    #[structopt(short, parse(from_os_str))]
    config_path: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let opt = Opt::from_args();

    let settings = Settings::new(opt.config_path).unwrap_or_else(|err| {
        eprintln!("{}", err);
        process::exit(1);
    });

    let _fmt_subscriber = FmtSubscriber::builder()
        .with_env_filter(settings.log.filter)
        .with_ansi(true)
        .init();

    sodiumoxide::init().map_err(|()| anyhow::anyhow!("failed to initialize the crypto layer"))?;

    let coordinator_public_key: Option<PublicKey> = settings
        .encryption
        .coordinator_public_key
        .as_ref()
        .map(|path| -> anyhow::Result<PublicKey> {
            let file = std::fs::File::open(path)?;
            Ok(serde_json::from_reader(file)?)
        })
        .transpose()?;

    let id = ParticipantId::new(settings.network.bind_address.port());
    let ledger = RoundLedger::open(&settings.ledger.path)?;
    if let Some(round) = ledger.last_round() {
        info!("resuming after round {}", round);
    }
    let state = ParticipantState::new(id, ledger, coordinator_public_key);

    let transport = Retrying::new(
        HttpTransport::new(
            settings.network.coordinator_host.clone(),
            settings.network.coordinator_port,
        ),
        settings.network.retry_attempts,
    );
    let (state_machine, requests_tx) = StateMachine::new(state, transport, NoopTrainer);

    tokio::select! {
        _ = state_machine.run() => {
            warn!("shutting down: state machine terminated");
        }
        _ = rest::serve(settings.network.bind_address, requests_tx) => {
            warn!("shutting down: REST server terminated");
        }
        _ = signal::ctrl_c() => {}
    }

    Ok(())
}
