/// Difference between a reference and a feedback signal.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct ErrorCalc {
    output: f32,
}

impl ErrorCalc {
    #[must_use]
    pub const fn new() -> Self {
        Self { output: 0.0 }
    }

    pub fn run(&mut self, reference: f32, feedback: f32) -> f32 {
        self.output = reference - feedback;
        self.output
    }

    #[must_use]
    pub const fn output(&self) -> f32 {
        self.output
    }

    pub fn reset(&mut self) {
        self.output = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subtracts_feedback_from_reference() {
        let mut error = ErrorCalc::new();
        assert!((error.run(10.0, 7.5) - 2.5).abs() < f32::EPSILON);
        assert!((error.output() - 2.5).abs() < f32::EPSILON);
        error.reset();
        assert!(error.output().abs() < f32::EPSILON);
    }
}
