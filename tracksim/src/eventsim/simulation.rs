use ordered_float::OrderedFloat;
use std::collections::BinaryHeap;

pub type ProcessId = usize;

/// A periodic task run by the event loop. `dt` is the time since this
/// process last ran.
pub trait Process<T> {
    fn resume(&mut self, world: &mut T, time: f64, dt: f64);
}

#[derive(Eq, PartialEq, Debug)]
pub struct QueuedTick {
    pub time: OrderedFloat<f64>,
    pub id: usize,
    pub process: ProcessId,
}

use std::cmp::Ordering;
impl Ord for QueuedTick {
    fn cmp(&self, other: &QueuedTick) -> Ordering {
        // Note that the order is flipped on purpose -- to turn
        // the (maximum) BinaryHeap into a minimum heap.
        // Ties run in process start order, then in scheduling order.
        other.time.cmp(&self.time).
            then_with(|| other.process.cmp(&self.process)).
            then_with(|| other.id.cmp(&self.id))
    }
}

impl PartialOrd for QueuedTick {
    fn partial_cmp(&self, other: &QueuedTick) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[test]
fn test_ordering() {
    let mut p = BinaryHeap::new();
    p.push(QueuedTick { time: OrderedFloat::from(123.0), id: 0, process: 0 });
    p.push(QueuedTick { time: OrderedFloat::from(0.0), id: 1, process: 0 });
    p.push(QueuedTick { time: OrderedFloat::from(122.0), id: 2, process: 0 });
    p.push(QueuedTick { time: OrderedFloat::from(0.0), id: 3, process: 1 });
    p.push(QueuedTick { time: OrderedFloat::from(0.0), id: 4, process: 0 });
    assert_eq!(p.pop().map(|q| (*q.time, q.id)), Some((0.0, 1)));
    assert_eq!(p.pop().map(|q| (*q.time, q.id)), Some((0.0, 4)));
    assert_eq!(p.pop().map(|q| (*q.time, q.id)), Some((0.0, 3)));
    assert_eq!(p.pop().map(|q| *q.time), Some(122.0));
    assert_eq!(p.pop().map(|q| *q.time), Some(123.0));
}

#[derive(Default)]
pub struct Scheduler {
    pub time: OrderedFloat<f64>,
    pub queue: BinaryHeap<QueuedTick>,
    id_counter: usize,
}

impl Scheduler {
    pub fn new() -> Self {
        Default::default()
    }

    /// Negative or infinite delays are dropped.
    pub fn schedule(&mut self, process: ProcessId, dt: f64) {
        if !(dt >= 0.0) || dt.is_infinite() {
            return;
        }
        let qt = QueuedTick {
            time: OrderedFloat::from(*self.time + dt),
            id: self.id_counter,
            process,
        };
        self.id_counter += 1;
        self.queue.push(qt);
    }
}

struct Periodic<T> {
    period: f64,
    last: f64,
    process: Box<dyn Process<T>>,
}

/// Single-threaded cooperative loop running periodic processes in time
/// order. Processes due at the same time run in the order they were
/// started.
pub struct Simulation<T> {
    pub world: T,
    procs: Vec<Periodic<T>>,
    pub scheduler: Scheduler,
}

impl<T> Simulation<T> {
    pub fn new(world: T) -> Self {
        Simulation {
            world,
            procs: Vec::new(),
            scheduler: Scheduler::new(),
        }
    }

    pub fn time(&self) -> f64 { *self.scheduler.time }

    /// Runs `p` now and then every `period` seconds.
    pub fn start_process(&mut self, period: f64, p: Box<dyn Process<T>>) -> ProcessId {
        let process_id = self.procs.len();
        let now = self.time();
        self.procs.push(Periodic { period, last: now, process: p });
        self.scheduler.schedule(process_id, 0.0);
        process_id
    }

    pub fn advance_by(&mut self, dt: f64) {
        let target = OrderedFloat::from(self.time() + dt);
        while let Some(&QueuedTick { time, .. }) = self.scheduler.queue.peek() {
            if time > target {
                break;
            }
            self.step();
        }
        self.scheduler.time = target;
    }

    pub fn step(&mut self) -> bool {
        match self.scheduler.queue.pop() {
            Some(tick) => {
                self.scheduler.time = tick.time;
                let time = *tick.time;
                let period = {
                    let p = &mut self.procs[tick.process];
                    let dt = time - p.last;
                    p.last = time;
                    p.process.resume(&mut self.world, time, dt);
                    p.period
                };
                if period > 0.0 {
                    self.scheduler.schedule(tick.process, period);
                }
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Recorder(&'static str);

    impl Process<Vec<(&'static str, f64, f64)>> for Recorder {
        fn resume(&mut self, world: &mut Vec<(&'static str, f64, f64)>, time: f64, dt: f64) {
            world.push((self.0, time, dt));
        }
    }

    #[test]
    fn periodic_processes_interleave() {
        let mut sim = Simulation::new(Vec::new());
        sim.start_process(0.5, Box::new(Recorder("fast")));
        sim.start_process(1.0, Box::new(Recorder("slow")));
        sim.advance_by(1.0);
        assert_eq!(sim.world, vec![
            ("fast", 0.0, 0.0),
            ("slow", 0.0, 0.0),
            ("fast", 0.5, 0.5),
            ("fast", 1.0, 0.5),
            ("slow", 1.0, 1.0),
        ]);
        assert_eq!(sim.time(), 1.0);

        sim.advance_by(1.0);
        assert_eq!(&sim.world[5..], &[
            ("fast", 1.5, 0.5),
            ("fast", 2.0, 0.5),
            ("slow", 2.0, 1.0),
        ]);
    }
}
