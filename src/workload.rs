use std::hint::black_box;

use crate::config::RunConfig;
use crate::error::Result;

/// The synthetic compute task run once per iteration. The driver treats it
/// as an opaque blocking call and only uses its return as a time boundary.
pub trait Workload {
    fn perform(&mut self, config: &RunConfig) -> Result<()>;
}

impl<F> Workload for F
where
    F: FnMut(&RunConfig) -> Result<()>,
{
    fn perform(&mut self, config: &RunConfig) -> Result<()> {
        self(config)
    }
}

/// Multiplies two dense `task_size x task_size` matrices, so the cost grows
/// with the cube of the task size. Scratch matrices are kept between calls
/// and only reallocated when the task size changes.
#[derive(Default)]
pub struct MatrixWorkload {
    n: usize,
    a: Vec<f64>,
    b: Vec<f64>,
    c: Vec<f64>,
}

impl MatrixWorkload {
    pub fn new() -> Self {
        Self::default()
    }

    fn resize(&mut self, n: usize) {
        if self.n == n {
            return;
        }
        self.n = n;
        self.a = (0..n * n).map(|k| (k % 7) as f64 + 0.5).collect();
        self.b = (0..n * n).map(|k| (k % 5) as f64 - 1.5).collect();
        self.c = vec![0.0; n * n];
    }

    /// The product from the most recent call, row-major.
    pub fn product(&self) -> &[f64] {
        &self.c
    }
}

impl Workload for MatrixWorkload {
    fn perform(&mut self, config: &RunConfig) -> Result<()> {
        let n = config.task_size;
        self.resize(n);

        let (a, b, c) = (&self.a, &self.b, &mut self.c);
        c.fill(0.0);

        for i in 0..n {
            for k in 0..n {
                let aik = a[i * n + k];
                for j in 0..n {
                    c[i * n + j] += aik * b[k * n + j];
                }
            }
        }
        black_box(&self.c);
        Ok(())
    }
}
