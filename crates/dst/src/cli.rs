//! Command line interface.
//!
//! Every option can also be given through the environment variable named
//! in its `env` attribute.

use clap::{Args, Parser, Subcommand};
use common::bitrate::Bitrate;
use dst_server::config::{ConfigError as ServerConfigError, ServerConfig, DEFAULT_BIND_HOST};
use dst_tester::config::{
    ConfigError as TesterConfigError, TesterConfig, DEFAULT_BUFFER_MAX_SECONDS,
    DEFAULT_BUFFER_MIN_SECONDS, DEFAULT_BUFFER_TOPPED_DELAY_SECONDS, DEFAULT_THREADS,
};
use dst_tester::downloader::DEFAULT_SPECULATIVE_RANGE;
use std::net::{IpAddr, SocketAddr};

#[derive(Debug, Parser)]
#[command(name = "dst", version = env!("CARGO_PKG_VERSION"), about, long_about = None, propagate_version = true)]
pub struct Cli {
    /// Serve Prometheus metrics on this address
    #[arg(long, env = "METRICS_ADDRESS", global = true)]
    pub metrics_address: Option<SocketAddr>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Emulate playback of a media URL
    #[command(alias = "t", name = "tester")]
    Tester(TesterArgs),

    /// Serve an endless stream of random bytes
    #[command(alias = "s", name = "server")]
    Server(ServerArgs),
}

#[derive(Debug, Args)]
pub struct TesterArgs {
    /// URL to download
    #[arg(env = "CONNECT_URL")]
    pub url: String,

    /// Playback bitrate, integer with k, m or g suffix (bits per second)
    #[arg(short, long, env = "BITRATE")]
    pub bitrate: Bitrate,

    /// Number of concurrent sessions
    #[arg(short, long, env = "NUM_THREADS", default_value_t = DEFAULT_THREADS)]
    pub threads: usize,

    /// Seconds of playback below which downloading resumes
    #[arg(long, env = "BUFFER_MIN", default_value_t = DEFAULT_BUFFER_MIN_SECONDS)]
    pub buffer_min: u64,

    /// Seconds of playback at which downloading pauses
    #[arg(long, env = "BUFFER_MAX", default_value_t = DEFAULT_BUFFER_MAX_SECONDS)]
    pub buffer_max: u64,

    /// Seconds to wait after the buffer is topped before resuming
    #[arg(long, env = "BUFFER_TOPPED_DELAY", default_value_t = DEFAULT_BUFFER_TOPPED_DELAY_SECONDS)]
    pub buffer_topped_delay: u64,

    /// Range request size in bytes when the content length is unknown
    #[arg(long, env = "SPECULATIVE_RANGE", default_value_t = DEFAULT_SPECULATIVE_RANGE)]
    pub speculative_range: u64,
}

impl TesterArgs {
    /// Build and validate the tester configuration.
    ///
    /// # Errors
    ///
    /// Returns the first invalid option.
    pub fn into_config(self) -> Result<TesterConfig, TesterConfigError> {
        TesterConfig::new(&self.url, self.bitrate)?
            .with_threads(self.threads)
            .with_buffer_bounds(self.buffer_min, self.buffer_max)
            .with_buffer_topped_delay(self.buffer_topped_delay)
            .with_speculative_range(self.speculative_range)
            .validate()
    }
}

#[derive(Debug, Args)]
pub struct ServerArgs {
    /// Port to listen on
    #[arg(env = "PORT")]
    pub port: u16,

    /// Pace streams at this bitrate (unpaced when omitted)
    #[arg(short, long, env = "BITRATE")]
    pub bitrate: Option<Bitrate>,

    /// Size of a random seed repeated cyclically (0 = live entropy)
    #[arg(long, env = "RANDOM_BYTES", default_value_t = 0)]
    pub random_bytes: usize,

    /// Address to listen on
    #[arg(long, env = "BIND_HOST", default_value_t = DEFAULT_BIND_HOST)]
    pub bind_host: IpAddr,
}

impl ServerArgs {
    /// Build and validate the server configuration.
    ///
    /// # Errors
    ///
    /// Returns the first invalid option.
    pub fn into_config(self) -> Result<ServerConfig, ServerConfigError> {
        ServerConfig::new(self.port)?
            .with_bind_host(self.bind_host)
            .with_bitrate(self.bitrate)
            .with_random_bytes(self.random_bytes)
    }
}
