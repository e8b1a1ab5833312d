use std::fmt;

use burn::{
    module::{AutodiffModule, ModuleVisitor, ParamId},
    optim::{GradientsParams, Optimizer},
    prelude::*,
    tensor::{backend::AutodiffBackend, cast::ToElement},
};
use serde::{Deserialize, Serialize};

use super::trainer::GanError;

/// Optimizer state behind a trait object so a component is not generic over
/// its optimizer type.
pub trait ParameterUpdate<B: AutodiffBackend, M: AutodiffModule<B>>: Send {
    fn update(&mut self, learning_rate: f64, module: M, grads: GradientsParams) -> M;
}

impl<B, M, O> ParameterUpdate<B, M> for O
where
    B: AutodiffBackend,
    M: AutodiffModule<B>,
    O: Optimizer<M, B>,
{
    fn update(&mut self, learning_rate: f64, module: M, grads: GradientsParams) -> M {
        self.step(learning_rate, module, grads)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Generator,
    Discriminator,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Generator => write!(f, "generator"),
            Self::Discriminator => write!(f, "discriminator"),
        }
    }
}

/// A trainable sub-network together with its optimizer.
pub struct Component<B: AutodiffBackend, M: AutodiffModule<B>> {
    pub module: M,
    role: Role,
    optimizer: Option<Box<dyn ParameterUpdate<B, M>>>,
    learning_rate: f64,
    updates: usize,
}

impl<B: AutodiffBackend, M: AutodiffModule<B>> Component<B, M> {
    pub fn new(role: Role, module: M) -> Self {
        Self {
            module,
            role,
            optimizer: None,
            learning_rate: 0.,
            updates: 0,
        }
    }

    pub fn compile<O: Optimizer<M, B> + 'static>(&mut self, optimizer: O, learning_rate: f64) {
        self.optimizer = Some(Box::new(optimizer));
        self.learning_rate = learning_rate;
    }

    pub fn is_compiled(&self) -> bool {
        self.optimizer.is_some()
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn learning_rate(&self) -> f64 {
        self.learning_rate
    }

    /// Number of optimizer steps applied so far.
    pub fn updates(&self) -> usize {
        self.updates
    }

    /// Applies one optimizer step using the gradients of this component's
    /// parameters and returns their mean squared magnitude.
    pub fn apply_gradients(&mut self, grads: B::Gradients) -> Result<f64, GanError> {
        let optimizer = self
            .optimizer
            .as_mut()
            .ok_or(GanError::NotCompiled(self.role))?;
        let grads = GradientsParams::from_grads(grads, &self.module);
        let magnitude = mean_squared_gradient::<B, M>(&self.module, &grads);
        self.module = optimizer.update(self.learning_rate, self.module.clone(), grads);
        self.updates += 1;
        Ok(magnitude)
    }
}

struct SquaredGradients<'a> {
    grads: &'a GradientsParams,
    total: f64,
    count: usize,
}

impl<B: AutodiffBackend> ModuleVisitor<B> for SquaredGradients<'_> {
    fn visit_float<const D: usize>(&mut self, id: ParamId, _tensor: &Tensor<B, D>) {
        if let Some(grad) = self.grads.get::<B::InnerBackend, D>(id) {
            self.total += grad.powf_scalar(2.0).mean().into_scalar().to_f64();
            self.count += 1;
        }
    }
}

/// Mean over parameters of the mean squared gradient entry.
pub fn mean_squared_gradient<B: AutodiffBackend, M: AutodiffModule<B>>(
    module: &M,
    grads: &GradientsParams,
) -> f64 {
    let mut visitor = SquaredGradients {
        grads,
        total: 0.,
        count: 0,
    };
    module.visit(&mut visitor);
    if visitor.count == 0 {
        0.
    } else {
        visitor.total / visitor.count as f64
    }
}
