use anyhow::Error;
use gossip_membership::{GossipCoordinator, GossipSettings, MemberIdentity};
use log::info;
use rand::rngs::SmallRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use structopt::StructOpt;

/// Runs a cluster of in-process nodes gossiping with each other.
#[derive(StructOpt)]
struct Config {
    #[structopt(short = "n", long = "nodes", default_value = "4")]
    nodes: usize,

    #[structopt(short = "r", long = "rounds", default_value = "30")]
    rounds: usize,

    #[structopt(short = "c", long = "cluster-name", default_value = "demo")]
    cluster_name: String,

    /// Round after which the last node goes silent.
    #[structopt(long = "silence-after")]
    silence_after: Option<usize>,

    /// Round after which the silenced node talks again.
    #[structopt(long = "revive-after")]
    revive_after: Option<usize>,

    #[structopt(flatten)]
    settings: GossipSettings,
}

fn main() -> Result<(), Error> {
    env_logger::init_from_env(env_logger::Env::default().default_filter_or("info"));
    let config = Config::from_args();
    let mut rng = SmallRng::from_entropy();

    let mut nodes = (0..config.nodes)
        .map(|i| {
            let identity = MemberIdentity::local(config.cluster_name.as_str(), format!("udp://127.0.0.1:{}", 2345 + i));
            GossipCoordinator::new(identity, config.settings.clone())
        })
        .collect::<Result<Vec<_>, _>>()?;
    let silenced = nodes.len().saturating_sub(1);

    for round in 0..config.rounds {
        let silent = config.silence_after.map_or(false, |after| round >= after)
            && config.revive_after.map_or(true, |after| round < after);

        for (index, node) in nodes.iter().enumerate() {
            if silent && index == silenced {
                continue;
            }
            node.beat();
            let (sender, members) = node.payload();
            // Members nobody has heard of yet are only reachable through the seed, the first node.
            let known = node.live_members();
            let target = match known.choose(&mut rng) {
                Some(record) => nodes.iter().position(|n| n.myself().id == record.identity.id),
                None if index != 0 => Some(0),
                None => None,
            };
            if let Some(target) = target {
                if !(silent && target == silenced) {
                    nodes[target].on_receive(&sender, &members);
                }
            }
        }

        for node in &nodes {
            info!(
                "round {} {}: live={} dead={}",
                round,
                node.myself().uri,
                node.live_members().len(),
                node.dead_members().len()
            );
        }
        std::thread::sleep(config.settings.gossip_interval());
    }

    for node in nodes.iter_mut() {
        node.stop()?;
    }
    Ok(())
}
