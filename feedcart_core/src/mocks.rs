//! Scripted weight sources for exercising the manager without a cart.
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use feedcart_hardware::HwError;
use feedcart_traits::{SourceError, SourceKind, WeightSource};

/// One scripted `read_total` outcome.
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    Kg(f64),
    Timeout,
    Fail(String),
}

impl Step {
    fn produce(&self) -> Result<f64, SourceError> {
        match self {
            Step::Kg(kg) => Ok(*kg),
            Step::Timeout => Err(Box::new(HwError::Timeout)),
            Step::Fail(msg) => Err(Box::new(std::io::Error::other(msg.clone()))),
        }
    }
}

#[derive(Debug)]
struct Script {
    kind: SourceKind,
    responsive: usize,
    queue: VecDeque<Step>,
    fallback: Step,
    cells: Option<Vec<f64>>,
    tare_ok: bool,
    probes: usize,
    reads: usize,
    tares: usize,
}

/// A `WeightSource` replaying queued steps, then repeating a fallback step.
///
/// Clones share the script, so a test can keep a handle after handing the
/// source to the manager.
#[derive(Debug, Clone)]
pub struct ScriptedSource {
    script: Arc<Mutex<Script>>,
}

impl ScriptedSource {
    /// A wired source reporting `responsive` channels at probe time.
    pub fn wired(responsive: usize) -> Self {
        Self {
            script: Arc::new(Mutex::new(Script {
                kind: SourceKind::Wired,
                responsive,
                queue: VecDeque::new(),
                fallback: Step::Kg(0.0),
                cells: None,
                tare_ok: true,
                probes: 0,
                reads: 0,
                tares: 0,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn then(self, step: Step) -> Self {
        self.lock().queue.push_back(step);
        self
    }

    pub fn push(&self, step: Step) {
        self.lock().queue.push_back(step);
    }

    /// Outcome used once the queue is empty.
    pub fn set_fallback(&self, step: Step) {
        self.lock().fallback = step;
    }

    pub fn set_cells(&self, cells: Option<Vec<f64>>) {
        self.lock().cells = cells;
    }

    pub fn set_tare_ok(&self, ok: bool) {
        self.lock().tare_ok = ok;
    }

    pub fn probes(&self) -> usize {
        self.lock().probes
    }

    pub fn reads(&self) -> usize {
        self.lock().reads
    }

    pub fn tares(&self) -> usize {
        self.lock().tares
    }
}

impl WeightSource for ScriptedSource {
    fn kind(&self) -> SourceKind {
        self.lock().kind
    }

    fn read_total(&mut self) -> Result<f64, SourceError> {
        let mut s = self.lock();
        s.reads += 1;
        let step = match s.queue.pop_front() {
            Some(step) => step,
            None => s.fallback.clone(),
        };
        step.produce()
    }

    fn read_cells(&mut self) -> Result<Vec<f64>, SourceError> {
        self.lock()
            .cells
            .clone()
            .ok_or_else(|| Box::new(HwError::NoResponsiveChannels) as SourceError)
    }

    fn tare(&mut self) -> bool {
        let mut s = self.lock();
        s.tares += 1;
        s.tare_ok
    }

    fn calibrate(&mut self, known_kg: f64) -> bool {
        known_kg > 0.0
    }

    fn probe(&mut self) -> usize {
        let mut s = self.lock();
        s.probes += 1;
        s.responsive
    }
}
