use std::{path::PathBuf, process};

use structopt::StructOpt;
use tokio::signal;
use tracing_subscriber::FmtSubscriber;

use addshare_core::{
    crypto::EncryptKeyPair,
    ledger::RoundLedger,
    message::ParticipantId,
    model::GlobalModel,
    transport::{HttpTransport, Retrying},
};
use addshare_coordinator::{
    rest,
    settings::Settings,
    state_machine::{coordinator::CoordinatorState, StateMachine},
    traits::NoopEvaluator,
};

#[macro_use]
extern crate tracing;

#[derive(Debug, StructOpt)]
#[structopt(name = "Coordinator")]
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

    let keys: Option<EncryptKeyPair> = settings
        .encryption
        .key_pair
        .as_ref()
        .map(|path| -> anyhow::Result<EncryptKeyPair> {
            let file = std::fs::File::open(path)?;
            Ok(serde_json::from_reader(file)?)
        })
        .transpose()?;

    let global_model: GlobalModel = {
        let file = std::fs::File::open(&settings.model.path)?;
        serde_json::from_reader(file)?
    };

    let participants: Vec<ParticipantId> = settings
        .protocol
        .participants
        .iter()
        .copied()
        .map(ParticipantId::new)
        .collect();

    let ledger = RoundLedger::open(&settings.ledger.path)?;
    if let Some(round) = ledger.last_round() {
        info!("resuming after round {}", round);
    }
    let state = CoordinatorState::new(
        participants,
        settings.protocol.rounds,
        global_model,
        keys,
        ledger,
    );

    let transport = Retrying::new(
        HttpTransport::new(
            settings.network.participant_host.clone(),
            settings.api.bind_address.port(),
        ),
        settings.network.retry_attempts,
    );
    let (state_machine, requests_tx) = StateMachine::new(state, transport, NoopEvaluator);

    tokio::select! {
        _ = state_machine.run() => {
            warn!("shutting down: state machine terminated");
        }
        _ = rest::serve(settings.api.bind_address, requests_tx) => {
            warn!("shutting down: REST server terminated");
        }
        _ = signal::ctrl_c() => {}
    }

    Ok(())
}
