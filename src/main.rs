use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;

use clap::Parser;
use log::{error, info, LevelFilter};
use simple_logger::SimpleLogger;

use grainbench::aggregate::{ResultFile, RESULT_FILE};
use grainbench::launch::{run_group, run_rank, Report};
use grainbench::message::{LocalCommunicator, TcpHost};
use grainbench::workload::MatrixWorkload;
use grainbench::{Error, InboundMode, Layout, Result, RunConfig};

#[derive(Clone, Copy, Debug)]
enum Transport {
    Local,
    Tcp,
}

impl FromStr for Transport {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "local" => Ok(Transport::Local),
            "tcp" => Ok(Transport::Tcp),
            _ => Err(format!("unknown transport '{}' (expected local or tcp)", s)),
        }
    }
}

#[derive(Debug, Parser)]
#[clap(version = "0.1.0", author = "J. Zrake <jzrake@clemson.edu>")]
#[clap(about = "Measure task time against compute time in a periodic neighbor exchange")]
struct Opts {
    /// Number of dimensions of the periodic process grid
    #[clap(long = "dim", default_value = "1")]
    dimensions: usize,

    /// Number of f64 values exchanged with each neighbor per direction
    #[clap(long = "arg", default_value = "16")]
    payload_size: usize,

    /// Size of one dimension of the task matrix
    #[clap(long = "task", default_value = "128")]
    task_size: usize,

    /// Number of measured iterations
    #[clap(long = "iters", default_value = "16")]
    iterations: usize,

    /// Inbound step semantics: receive, or send (second send from the receive buffers)
    #[clap(long, default_value = "receive")]
    inbound: InboundMode,

    /// Axis extents: even (remainder on the last axis) or balanced
    #[clap(long, default_value = "even")]
    layout: Layout,

    /// Number of ranks to run inside this process
    #[clap(short = 'n', long, default_value = "1")]
    ranks: usize,

    /// Transport between in-process ranks: local or tcp
    #[clap(long, default_value = "local")]
    transport: Transport,

    /// First loopback port for in-process ranks over tcp (0 lets the system pick)
    #[clap(long, default_value = "7000")]
    base_port: u16,

    /// Run as this rank of a multi-process group (requires --peers)
    #[clap(long, requires = "peers")]
    rank: Option<usize>,

    /// Addresses of every rank of a multi-process group, comma separated
    #[clap(long, value_delimiter = ',')]
    peers: Vec<SocketAddr>,

    /// Where the coordinator writes the result table
    #[clap(short = 'o', long, default_value = RESULT_FILE)]
    output: PathBuf,

    /// Pin each in-process rank to a CPU core
    #[clap(long)]
    pin_cores: bool,

    #[clap(long, default_value = "info")]
    log_level: LevelFilter,
}

fn run(opts: Opts) -> Result<()> {
    let config = RunConfig {
        dimensions: opts.dimensions,
        payload_size: opts.payload_size,
        task_size: opts.task_size,
        iterations: opts.iterations,
        inbound: opts.inbound,
        layout: opts.layout,
    }
    .validate()?;

    info!("{:?}", config);

    let rows = if let Some(rank) = opts.rank {
        let comm = TcpHost::start(rank, opts.peers)?;
        let mut sink = ResultFile::new(&opts.output);
        let report = run_rank(&comm, &config, &mut MatrixWorkload::new(), &mut sink)?;
        report.rows
    } else {
        if opts.ranks == 0 {
            return Err(Error::Config("at least one rank is required".to_string()));
        }
        let sink = Box::new(ResultFile::new(&opts.output));
        let workload = |_| MatrixWorkload::new();

        let reports: Vec<Report> = match opts.transport {
            Transport::Local => run_group(
                LocalCommunicator::group(opts.ranks),
                &config,
                workload,
                sink,
                opts.pin_cores,
            )?,
            Transport::Tcp => {
                let comms = if opts.base_port == 0 {
                    TcpHost::group(opts.ranks)?
                } else {
                    let peers = TcpHost::loopback_peers(opts.base_port, opts.ranks)?;
                    (0..opts.ranks)
                        .map(|rank| TcpHost::start(rank, peers.clone()))
                        .collect::<Result<Vec<_>>>()?
                };
                run_group(comms, &config, workload, sink, opts.pin_cores)?
            }
        };
        reports.into_iter().find_map(|report| report.rows)
    };

    if let Some(rows) = rows {
        for (rank, row) in rows.iter().enumerate() {
            info!(
                "rank {:>4}: task {:.6}s compute {:.6}s overhead {:.6}s",
                rank,
                row.task,
                row.compute,
                row.overhead()
            );
        }
    }
    Ok(())
}

fn main() {
    let opts = Opts::parse();

    if let Err(e) = SimpleLogger::new().with_level(opts.log_level).init() {
        eprintln!("could not install logger: {}", e);
    }

    if let Err(e) = run(opts) {
        error!("{}", e);
        std::process::exit(1);
    }
}
