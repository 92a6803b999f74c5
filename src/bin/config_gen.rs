// Copyright 2021 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

//! Generates per-node overlay configs from a range config and channel list.
//!
//! The first invocation plans committees, rings and channel roles and emits
//! `network-manager-request.json`; rerunning with `--fulfilled-requests`
//! verifies the comms generators fulfilled every requested link.

#![forbid(unsafe_code)]

use covert_network::config_gen::{self, GenOptions};
use eyre::{Result, WrapErr};
use std::path::PathBuf;
use structopt::StructOpt;
use tracing_subscriber::filter::EnvFilter;

/// Generate overlay config files.
#[derive(Debug, StructOpt)]
#[structopt(name = "config_gen")]
struct Opt {
    /// Range config of the physical network.
    #[structopt(long = "range")]
    range_config_file: PathBuf,

    /// List of channel properties.
    #[structopt(long = "channel-list")]
    channel_list_file: PathBuf,

    /// Where to store the generated configs.
    #[structopt(long = "config-dir")]
    config_dir: PathBuf,

    /// Overwrite configs if they exist.
    #[structopt(long)]
    overwrite: bool,

    /// Only use these channels for genesis client<->server links.
    #[structopt(long = "genesis-c2s-channels", default_value = "")]
    genesis_c2s_channels: String,

    /// Only use these channels for genesis server<->server links.
    #[structopt(long = "genesis-s2s-channels", default_value = "")]
    genesis_s2s_channels: String,

    /// Dynamically create client<->server links on these channels.
    #[structopt(long = "dynamic-c2s-channels", default_value = "")]
    dynamic_c2s_channels: String,

    /// Dynamically create server<->server links on these channels.
    #[structopt(long = "dynamic-s2s-channels", default_value = "")]
    dynamic_s2s_channels: String,

    /// Allow range configs that only contain server nodes.
    #[structopt(long = "allow-no-clients")]
    allow_no_clients: bool,

    /// Request genesis links for every server-server and client-server pair.
    #[structopt(long = "complete-connectivity")]
    complete_connectivity: bool,

    /// Merged fulfilled requests from the comms config generators.
    #[structopt(long = "fulfilled-requests")]
    fulfilled_requests_file: Option<PathBuf>,

    /// Disable dynamic link negotiation.
    #[structopt(long = "disable-dynamic-links")]
    disable_dynamic_links: bool,

    /// Desired committee size; defaults to log2 of the server count.
    #[structopt(long = "committee-size")]
    committee_size: Option<usize>,

    /// Committees to forward to per hop; 0 floods all reachable ones.
    #[structopt(long = "flooding-factor", default_value = "2")]
    flooding_factor: usize,

    /// Ring paths to generate per committee.
    #[structopt(long = "num-rings", default_value = "2")]
    num_rings: usize,

    /// Force client entrance and exit committees to differ.
    #[structopt(long = "diff-entrance-exit")]
    diff_entrance_exit: bool,

    /// Log to hourly-rolling files in this directory instead of stdout.
    #[structopt(long = "log-dir")]
    log_dir: Option<PathBuf>,
}

fn main() -> Result<()> {
    color_eyre::install()?;

    let opt = Opt::from_args();

    let filter = EnvFilter::try_from_env("RUST_LOG")
        .unwrap_or_else(|_| EnvFilter::new("covert_network=info,config_gen=info"));
    let _log_guard = if let Some(log_dir) = &opt.log_dir {
        let file_appender = tracing_appender::rolling::hourly(log_dir, "config_gen.log");
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
        tracing_subscriber::fmt()
            .with_writer(non_blocking)
            .with_env_filter(filter)
            .with_ansi(false)
            .init();
        Some(guard)
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
        None
    };
    let options = GenOptions {
        range_config_file: opt.range_config_file,
        channel_list_file: opt.channel_list_file,
        config_dir: opt.config_dir,
        overwrite: opt.overwrite,
        genesis_c2s_channels: opt.genesis_c2s_channels,
        genesis_s2s_channels: opt.genesis_s2s_channels,
        dynamic_c2s_channels: opt.dynamic_c2s_channels,
        dynamic_s2s_channels: opt.dynamic_s2s_channels,
        allow_no_clients: opt.allow_no_clients,
        complete_connectivity: opt.complete_connectivity,
        fulfilled_requests_file: opt.fulfilled_requests_file,
        disable_dynamic_links: opt.disable_dynamic_links,
        committee_size: opt.committee_size,
        flooding_factor: opt.flooding_factor,
        num_rings: opt.num_rings,
        diff_entrance_exit: opt.diff_entrance_exit,
    };

    config_gen::run(&options).wrap_err("config generation failed")
}
