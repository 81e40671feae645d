#[macro_use]
extern crate lazy_static;

mod histogram;

use histogram::Histogram;
use multichan::select::{recv, select};
use multichan::{make, RecvOutcome};
use std::sync::Mutex;
use std::thread;
use std::time::{Duration, Instant};

const RECEIVERS: usize = 7;
const ITERS: usize = 500;

lazy_static! {
    static ref HIST: Mutex<Histogram> = Mutex::new(Histogram::new());
}

/// One channel, several receivers racing to dequeue each send — latency from
/// `send` to whichever receiver's `recv` wakes up.
fn bench_fan_out() -> Histogram {
    HIST.lock().unwrap().clear();
    let chan = make::<Instant>(0);

    let handles: Vec<_> = (0..RECEIVERS)
        .map(|_| {
            let chan = chan.clone();
            thread::spawn(move || loop {
                match chan.recv() {
                    RecvOutcome::Msg(ts) => {
                        let micros = ts.elapsed().subsec_nanos() as f64 / 1_000.0;
                        HIST.lock().unwrap().add(micros);
                    }
                    RecvOutcome::Closed => break,
                }
            })
        })
        .collect();

    let mut pb = pbr::ProgressBar::new(ITERS as u64);
    for _ in 0..ITERS {
        pb.inc();
        thread::sleep(Duration::from_millis(1));
        chan.send(Instant::now()).unwrap();
    }
    chan.close().unwrap();
    for h in handles {
        h.join().unwrap();
    }
    HIST.lock().unwrap().clone()
}

/// Several channels, one `select` loop — latency from `send` on a randomly
/// chosen channel to the `select` call that picks it up.
fn bench_select_fan_in() -> Histogram {
    HIST.lock().unwrap().clear();
    const CHANS: usize = 4;
    let chans: Vec<_> = (0..CHANS).map(|_| make::<Instant>(0)).collect();

    let recv_chans = chans.clone();
    let handle = thread::spawn(move || loop {
        let cases = recv_chans
            .iter()
            .map(|c| recv(c, |v| v))
            .collect();
        match select(cases, None) {
            RecvOutcome::Msg(ts) => {
                let micros = ts.elapsed().subsec_nanos() as f64 / 1_000.0;
                HIST.lock().unwrap().add(micros);
            }
            RecvOutcome::Closed => break,
        }
    });

    let mut pb = pbr::ProgressBar::new(ITERS as u64);
    for i in 0..ITERS {
        pb.inc();
        thread::sleep(Duration::from_millis(1));
        chans[i % CHANS].send(Instant::now()).unwrap();
    }
    for c in &chans {
        c.close().unwrap();
    }
    handle.join().unwrap();
    HIST.lock().unwrap().clone()
}

fn main() {
    env_logger::init();

    println!("# fan_out\n{}", bench_fan_out());
    println!("# select_fan_in\n{}", bench_select_fan_in());
}
