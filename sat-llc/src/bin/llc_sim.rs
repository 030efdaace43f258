use clap::Parser;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use sat_llc::classifier::DSCP_EF;
use sat_llc::{ConfigError, EventLog, Llc, LlcConfig, LlcEvent, PeerAddress, PeerRegistry};
use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

/// Drives a gateway and a terminal over a lossy in-memory satellite hop.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// JSON configuration file of the gateway; defaults are used when absent.
    /// The terminal mirrors its ARQ directions.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Write the effective gateway configuration to this file and continue.
    #[arg(long)]
    save_config: Option<PathBuf>,

    /// Run ARQ on both links.
    #[arg(long)]
    arq: bool,

    /// Run ARQ on the forward link (gateway to terminal).
    #[arg(long)]
    fwd_arq: bool,

    /// Run ARQ on the return link (terminal to gateway).
    #[arg(long)]
    rtn_arq: bool,

    /// Number of units sent from the gateway to the terminal.
    #[arg(long, default_value_t = 70)]
    units: usize,

    /// Largest unit size in bytes.
    #[arg(long, default_value_t = 10_000)]
    max_unit: usize,

    /// Frame loss probability on the hop.
    #[arg(long, default_value_t = 0.0)]
    loss: f64,

    /// One-way propagation delay in milliseconds.
    #[arg(long, default_value_t = 270)]
    delay_ms: u64,

    /// Bytes granted per transmission opportunity.
    #[arg(long, default_value_t = 1500)]
    opportunity: usize,

    /// Interval between opportunities in milliseconds.
    #[arg(long, default_value_t = 10)]
    step_ms: u64,

    /// Stop after this many opportunities.
    #[arg(long, default_value_t = 200_000)]
    max_steps: u64,

    #[arg(long, default_value_t = 0)]
    seed: u64,
}

/// One direction of the hop: frames in flight with their arrival time.
struct Channel {
    delay: Duration,
    loss: f64,
    in_flight: VecDeque<(Instant, Vec<u8>)>,
    sent: usize,
    dropped: usize,
}

impl Channel {
    fn new(delay: Duration, loss: f64) -> Self {
        Self {
            delay,
            loss,
            in_flight: VecDeque::new(),
            sent: 0,
            dropped: 0,
        }
    }

    fn send(&mut self, bytes: Vec<u8>, now: Instant, rng: &mut StdRng) {
        self.sent += 1;
        if rng.gen_bool(self.loss) {
            self.dropped += 1;
            return;
        }
        self.in_flight.push_back((now + self.delay, bytes));
    }

    fn arrivals(&mut self, now: Instant) -> Vec<Vec<u8>> {
        let mut out = Vec::new();
        while self.in_flight.front().is_some_and(|(at, _)| *at <= now) {
            if let Some((_, bytes)) = self.in_flight.pop_front() {
                out.push(bytes);
            }
        }
        out
    }
}

#[derive(Debug, Default)]
struct Summary {
    delivered: usize,
    delivered_bytes: usize,
    lost: usize,
    unexpected: usize,
}

fn collect(llc: &mut Llc<EventLog>, outstanding: &mut HashMap<Vec<u8>, usize>, summary: &mut Summary) {
    while let Some(event) = llc.upper_layer_mut().poll_event() {
        match event {
            LlcEvent::Delivered { unit, .. } => match outstanding.get_mut(&unit) {
                Some(count) if *count > 0 => {
                    *count -= 1;
                    summary.delivered += 1;
                    summary.delivered_bytes += unit.len();
                }
                _ => summary.unexpected += 1,
            },
            LlcEvent::Lost { flow, error, .. } => {
                debug!(flow = %flow, "{error}");
                summary.lost += 1;
            }
        }
    }
}

fn main() -> Result<(), ConfigError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let mut gw_config = match &args.config {
        Some(path) => LlcConfig::load(path)?,
        None => LlcConfig::default(),
    };
    gw_config.tx_arq_enabled |= args.arq || args.fwd_arq;
    gw_config.rx_arq_enabled |= args.arq || args.rtn_arq;
    gw_config.validate()?;
    if let Some(path) = &args.save_config {
        gw_config.save(path)?;
    }
    let ut_config = LlcConfig {
        tx_arq_enabled: gw_config.rx_arq_enabled,
        rx_arq_enabled: gw_config.tx_arq_enabled,
        ..gw_config.clone()
    };

    let gw_addr = PeerAddress::from_index(0);
    let ut_addr = PeerAddress::from_index(1);
    let mut gw = Llc::new(gw_config.clone(), PeerRegistry::new(), EventLog::new())?;
    let mut ut = Llc::new(ut_config, PeerRegistry::new(), EventLog::new())?;
    gw.add_peer(ut_addr);
    ut.add_peer(gw_addr);

    let mut rng = StdRng::seed_from_u64(args.seed);
    let tos_choices = [0u8, DSCP_EF << 2, 18 << 2];
    let mut outstanding: HashMap<Vec<u8>, usize> = HashMap::new();
    let mut offered_bytes = 0;
    for _ in 0..args.units {
        let len = rng.gen_range(3..=args.max_unit.max(3));
        let unit: Vec<u8> = (0..len).map(|_| rng.r#gen()).collect();
        let tos = tos_choices[rng.gen_range(0..tos_choices.len())];
        offered_bytes += unit.len();
        *outstanding.entry(unit.clone()).or_default() += 1;
        gw.enqueue(unit, ut_addr, tos)?;
    }

    info!(
        units = args.units,
        bytes = offered_bytes,
        fwd_arq = gw_config.tx_arq_enabled,
        rtn_arq = gw_config.rx_arq_enabled,
        loss = args.loss,
        "starting simulation"
    );

    let delay = Duration::from_millis(args.delay_ms);
    let step = Duration::from_millis(args.step_ms);
    let loss = args.loss.clamp(0.0, 1.0);
    let mut forward = Channel::new(delay, loss);
    let mut ret = Channel::new(delay, loss);
    let start = Instant::now();
    let mut now = start;
    let mut summary = Summary::default();
    let mut steps = 0;

    while steps < args.max_steps {
        if let Some(frame) = gw.notify_tx_opportunity(ut_addr, args.opportunity, now) {
            forward.send(frame.encode(), now, &mut rng);
        }
        if let Some(frame) = ut.notify_tx_opportunity(gw_addr, args.opportunity, now) {
            ret.send(frame.encode(), now, &mut rng);
        }
        for bytes in forward.arrivals(now) {
            // Non-fatal: already logged by the dispatcher.
            let _ = ut.receive_frame(gw_addr, &bytes, now);
        }
        for bytes in ret.arrivals(now) {
            let _ = gw.receive_frame(ut_addr, &bytes, now);
        }
        gw.tick(now);
        ut.tick(now);
        // Losses surface on whichever side gave up on a frame.
        collect(&mut ut, &mut outstanding, &mut summary);
        collect(&mut gw, &mut outstanding, &mut summary);

        steps += 1;
        now += step;

        let idle = gw.buffers_empty()
            && ut.buffers_empty()
            && forward.in_flight.is_empty()
            && ret.in_flight.is_empty()
            && gw.next_deadline().is_none()
            && ut.next_deadline().is_none();
        if idle {
            break;
        }
    }

    let elapsed = now - start;
    println!("simulated time      {:.3} s", elapsed.as_secs_f64());
    println!("opportunities       {steps}");
    println!("units offered       {}", args.units);
    println!("units delivered     {}", summary.delivered);
    println!("bytes delivered     {} / {offered_bytes}", summary.delivered_bytes);
    println!("loss reports        {}", summary.lost);
    println!("unexpected units    {}", summary.unexpected);
    println!(
        "frames forward      {} sent, {} dropped",
        forward.sent, forward.dropped
    );
    println!("frames return       {} sent, {} dropped", ret.sent, ret.dropped);
    Ok(())
}
