use std::sync::Arc;

use ganesh::{
    algorithms::LBFGSB, observers::DebugObserver, Algorithm, Function, Minimizer, Observer, Status,
};
use num::complex::Complex64;
use parking_lot::Mutex;
use tracing::{info, trace};

use crate::{
    data::DataSet,
    decay_tree::FreeAmplitude,
    execution::ExecutionContext,
    integral::ModelIntegral,
    model::{sum_of_log_intensity, Model},
    parameters::RealParameter,
    SaplingError, SaplingResult,
};

/// A fit parameter of a [`LogLikelihood`]: a complex free amplitude (two real values) or an
/// admixture.
#[derive(Debug, Clone)]
enum FitParameter {
    Amplitude(Arc<FreeAmplitude>),
    Admixture(Arc<RealParameter>, String),
}

/// An unbinned negative log-likelihood of a data sample under a [`Model`], normalized by a
/// Monte-Carlo integral:
///
/// ```math
/// NLL(\vec{p}) = -\left(\sum_{d \in \text{Data}} \left(\ln I(d; \vec{p}) - \text{pedestal}\right) - N_{\text{Data}} \ln \int I(\vec{p})\right)
/// ```
///
/// The fit parameters are the real and imaginary parts of every free amplitude that is not
/// fixed, followed by every admixture that is not fixed.
pub struct LogLikelihood<'a> {
    model: &'a Model,
    data: Mutex<DataSet>,
    mc: Mutex<DataSet>,
    integral: Mutex<ModelIntegral>,
    parameters: Vec<FitParameter>,
    ctx: ExecutionContext,
    pedestal: f64,
}

impl<'a> LogLikelihood<'a> {
    /// Build a likelihood over `data`, normalized by the phase-space sample `mc`.
    ///
    /// # Errors
    ///
    /// [`SaplingError::ModelNotLocked`], [`SaplingError::ModelMismatch`] if either data set
    /// belongs to another model, and [`SaplingError::Custom`] if either is empty.
    pub fn new(model: &'a Model, data: DataSet, mc: DataSet, ctx: ExecutionContext, pedestal: f64) -> SaplingResult<Self> {
        let integral = ModelIntegral::new(model)?;
        for set in [&data, &mc] {
            if set.model_id() != model.id() {
                return Err(SaplingError::ModelMismatch {
                    expected: model.id(),
                    found: set.model_id(),
                });
            }
            if set.is_empty() {
                return Err(SaplingError::Custom("likelihood needs non-empty data sets".to_string()));
            }
        }
        let mut parameters = Vec::new();
        for fa in model.free_amplitudes() {
            if !fa.parameter().is_fixed() {
                parameters.push(FitParameter::Amplitude(fa));
            }
        }
        for component in model.components() {
            if !component.admixture().is_fixed() {
                parameters.push(FitParameter::Admixture(
                    component.admixture().clone(),
                    component.label().to_string(),
                ));
            }
        }
        info!(
            data = data.len(),
            mc = mc.len(),
            parameters = parameters.len(),
            "built log-likelihood"
        );
        Ok(Self {
            model,
            data: Mutex::new(data),
            mc: Mutex::new(mc),
            integral: Mutex::new(integral),
            parameters,
            ctx,
            pedestal,
        })
    }

    /// Names of the fit parameters, in the order [`Function::evaluate`] expects them.
    pub fn parameters(&self) -> Vec<String> {
        self.parameters
            .iter()
            .flat_map(|p| match p {
                FitParameter::Amplitude(fa) => vec![
                    format!("{} (re)", fa.label()),
                    format!("{} (im)", fa.label()),
                ],
                FitParameter::Admixture(_, label) => vec![format!("{} admixture", label)],
            })
            .collect()
    }

    /// Number of real fit parameters.
    pub fn n_parameters(&self) -> usize {
        self.parameters
            .iter()
            .map(|p| match p {
                FitParameter::Amplitude(_) => 2,
                FitParameter::Admixture(..) => 1,
            })
            .sum()
    }

    /// The current values of the fit parameters.
    pub fn values(&self) -> Vec<f64> {
        self.parameters
            .iter()
            .flat_map(|p| match p {
                FitParameter::Amplitude(fa) => vec![fa.value().re, fa.value().im],
                FitParameter::Admixture(a, _) => vec![a.value()],
            })
            .collect()
    }

    /// Bounds for each fit parameter: admixtures are non-negative, amplitudes unbounded.
    pub fn bounds(&self) -> Vec<(f64, f64)> {
        self.parameters
            .iter()
            .flat_map(|p| match p {
                FitParameter::Amplitude(_) => vec![(f64::NEG_INFINITY, f64::INFINITY); 2],
                FitParameter::Admixture(..) => vec![(0.0, f64::INFINITY)],
            })
            .collect()
    }

    /// Write fit-parameter values into the model.
    ///
    /// # Errors
    ///
    /// [`SaplingError::Custom`] if the number of values is wrong.
    pub fn set_parameters(&self, values: &[f64]) -> SaplingResult<()> {
        if values.len() != self.n_parameters() {
            return Err(SaplingError::Custom(format!(
                "expected {} parameter values, found {}",
                self.n_parameters(),
                values.len()
            )));
        }
        let mut values = values.iter().copied();
        for p in &self.parameters {
            match p {
                FitParameter::Amplitude(fa) => {
                    let re = values.next().unwrap_or_default();
                    let im = values.next().unwrap_or_default();
                    fa.set_value(Complex64::new(re, im))?;
                }
                FitParameter::Admixture(a, _) => a.set_value(values.next().unwrap_or_default())?,
            }
        }
        Ok(())
    }

    /// The negative log-likelihood at the current model parameters.
    ///
    /// Refreshes the stale part of the integral and of the data caches, then marks every
    /// parameter unchanged.
    pub fn value(&self) -> SaplingResult<f64> {
        let integral = {
            let mut integral = self.integral.lock();
            integral.integrate(self.model, &mut self.mc.lock(), &self.ctx)?;
            integral.integral()
        };
        let mut data = self.data.lock();
        let n = data.len() as f64;
        let sum = sum_of_log_intensity(self.model, &mut data, self.pedestal, &self.ctx)?;
        self.model.set_parameter_flags_to_unchanged();
        let nll = -(sum - n * integral.ln());
        trace!(nll, integral, "evaluated log-likelihood");
        Ok(nll)
    }

    /// The expected number of data events each Monte-Carlo event represents,
    /// $`N_{\text{Data}} I(e) / (N_{\text{MC}} \int I)`$, at the current parameters.
    pub fn project(&self) -> SaplingResult<Vec<f64>> {
        let mut mc = self.mc.lock();
        let integral = {
            let mut integral = self.integral.lock();
            integral.integrate(self.model, &mut mc, &self.ctx)?;
            integral.integral()
        };
        self.model.calculate(&mut mc, &self.ctx)?;
        let scale = self.data.lock().len() as f64 / (mc.len() as f64 * integral);
        Ok(self
            .model
            .intensities(&mc)?
            .into_iter()
            .map(|i| i * scale)
            .collect())
    }

    /// Minimize the negative log-likelihood starting from `p0` (the current values if `None`).
    ///
    /// The model is left at the best parameters found.
    pub fn minimize(
        &self,
        p0: Option<&[f64]>,
        bounds: Option<Vec<(f64, f64)>>,
        options: Option<MinimizerOptions>,
    ) -> SaplingResult<Status<f64>> {
        let options = options.unwrap_or_default();
        let p0 = p0.map_or_else(|| self.values(), |p| p.to_vec());
        let mut m = Minimizer::new_from_box(options.algorithm, self.n_parameters())
            .with_bounds(bounds)
            .with_observers(options.observers)
            .with_max_steps(options.max_steps);
        m.minimize(self, &p0, &mut ())?;
        self.set_parameters(m.status.x.as_slice())?;
        info!(
            fx = m.status.fx,
            converged = m.status.converged,
            "minimization finished"
        );
        Ok(m.status)
    }
}

impl Function<f64, (), SaplingError> for LogLikelihood<'_> {
    fn evaluate(&self, parameters: &[f64], _user_data: &mut ()) -> Result<f64, SaplingError> {
        self.set_parameters(parameters)?;
        self.value()
    }
}

/// A set of options that are used when minimizations are performed.
pub struct MinimizerOptions {
    algorithm: Box<dyn Algorithm<f64, (), SaplingError>>,
    observers: Vec<Box<dyn Observer<f64, ()>>>,
    max_steps: usize,
}

impl Default for MinimizerOptions {
    fn default() -> Self {
        Self {
            algorithm: Box::new(LBFGSB::default()),
            observers: Default::default(),
            max_steps: 4000,
        }
    }
}

/// Reports minimizer progress through `tracing`.
struct TracingObserver {
    show_x: bool,
}

impl Observer<f64, ()> for TracingObserver {
    fn callback(&mut self, step: usize, status: &mut Status<f64>, _user_data: &mut ()) -> bool {
        if self.show_x {
            info!(step, fx = status.fx, x = %status.x.transpose(), "minimizer step");
        } else {
            info!(step, fx = status.fx, "minimizer step");
        }
        false
    }
}

impl MinimizerOptions {
    /// Adds the [`DebugObserver`] to the minimization.
    pub fn debug(self) -> Self {
        self.with_observer(DebugObserver)
    }
    /// Log every step at `info` level, optionally with the current position.
    pub fn verbose(self, show_x: bool) -> Self {
        self.with_observer(TracingObserver { show_x })
    }
    /// Set the [`Algorithm`] to be used in the minimization (default: [`LBFGSB`] with default
    /// settings).
    pub fn with_algorithm<A: Algorithm<f64, (), SaplingError> + 'static>(self, algorithm: A) -> Self {
        Self {
            algorithm: Box::new(algorithm),
            observers: self.observers,
            max_steps: self.max_steps,
        }
    }
    /// Add an [`Observer`] to the list of [`Observer`]s used in the minimization.
    pub fn with_observer<O: Observer<f64, ()> + 'static>(self, observer: O) -> Self {
        let mut observers = self.observers;
        observers.push(Box::new(observer));
        Self {
            algorithm: self.algorithm,
            observers,
            max_steps: self.max_steps,
        }
    }
    /// Set the maximum number of [`Algorithm`] steps for the minimization (default: 4000).
    pub fn with_max_steps(self, max_steps: usize) -> Self {
        Self {
            algorithm: self.algorithm,
            observers: self.observers,
            max_steps,
        }
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;
    use crate::{
        test_models::{d3pi, generate_events},
        utils::enums::Formalism,
    };

    fn likelihood(model: &Model, n_data: usize, n_mc: usize) -> LogLikelihood<'_> {
        let mut data = model.create_data_set().unwrap();
        for event in generate_events(model, n_data, 31) {
            data.push(model, event).unwrap();
        }
        let mut mc = model.create_data_set().unwrap();
        for event in generate_events(model, n_mc, 32) {
            mc.push(model, event).unwrap();
        }
        data.partition(2);
        LogLikelihood::new(model, data, mc, ExecutionContext::default(), 0.0).unwrap()
    }

    #[test]
    fn test_parameter_layout() {
        let model = d3pi(Formalism::Helicity);
        let nll = likelihood(&model, 10, 20);
        // two free D+ amplitudes, fixed lineshape amplitudes and a fixed admixture
        let names = nll.parameters();
        assert_eq!(names.len(), 4);
        assert!(names[0].ends_with("(re)") && names[1].ends_with("(im)"));
        nll.set_parameters(&[1.0, 2.0, -0.5, 0.25]).unwrap();
        assert_eq!(nll.values(), vec![1.0, 2.0, -0.5, 0.25]);
        assert!(nll.set_parameters(&[1.0]).is_err());
        assert!(nll.bounds().iter().all(|b| b.0 == f64::NEG_INFINITY));
    }

    #[test]
    fn test_value_matches_direct_sum() {
        let model = d3pi(Formalism::Helicity);
        let nll = likelihood(&model, 30, 60);
        nll.set_parameters(&[1.0, 0.0, 0.4, 0.9]).unwrap();
        let value = nll.value().unwrap();

        let ctx = ExecutionContext::default();
        let mut mc = model.create_data_set().unwrap();
        for event in generate_events(&model, 60, 32) {
            mc.push(&model, event).unwrap();
        }
        model.calculate(&mut mc, &ctx).unwrap();
        let integral = model.intensities(&mc).unwrap().iter().sum::<f64>() / 60.0;
        let mut data = model.create_data_set().unwrap();
        for event in generate_events(&model, 30, 31) {
            data.push(&model, event).unwrap();
        }
        model.calculate(&mut data, &ctx).unwrap();
        let sum: f64 = model.intensities(&data).unwrap().iter().map(|i| i.ln()).sum();
        assert_relative_eq!(value, -(sum - 30.0 * integral.ln()), max_relative = 1e-10);

        let weights = nll.project().unwrap();
        assert_eq!(weights.len(), 60);
        assert_relative_eq!(weights.iter().sum::<f64>(), 30.0, max_relative = 1e-10);
    }

    #[test]
    fn test_overall_scale_does_not_matter() {
        let model = d3pi(Formalism::Zemach);
        let nll = likelihood(&model, 20, 40);
        let a = nll.evaluate(&[1.0, 0.0, 0.3, -0.7], &mut ()).unwrap();
        let scale = Complex64::from_polar(2.5, 0.4);
        let first = scale * Complex64::new(1.0, 0.0);
        let second = scale * Complex64::new(0.3, -0.7);
        let b = nll
            .evaluate(&[first.re, first.im, second.re, second.im], &mut ())
            .unwrap();
        assert_relative_eq!(a, b, max_relative = 1e-10);
    }

    #[test]
    fn test_minimize_lowers_the_likelihood() {
        let model = d3pi(Formalism::Helicity);
        let nll = likelihood(&model, 40, 80);
        let p0 = [1.0, 0.0, 2.0, 1.0];
        let start = nll.evaluate(&p0, &mut ()).unwrap();
        let status = nll
            .minimize(Some(&p0), None, Some(MinimizerOptions::default().with_max_steps(30)))
            .unwrap();
        assert!(status.fx <= start);
        assert_eq!(nll.values(), status.x.as_slice().to_vec());
    }
}
