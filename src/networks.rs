//! Neural network architectures using Burn

use burn::config::Config;
use burn::module::{Module, Param};
use burn::nn::{Linear, LinearConfig};
use burn::tensor::{activation, backend::Backend, Tensor};
use rand::Rng;
use rand_distr::{Distribution, Normal, Uniform};

use crate::error::LqrError;
use crate::utils::{tensor_from_rows, tensor_from_vec};

/// Activation function types
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Activation {
    Relu,
    /// `x²`, makes a one-hidden-layer network a quadratic form of its input
    Quadratic,
}

impl Activation {
    pub fn forward<B: Backend, const D: usize>(&self, x: Tensor<B, D>) -> Tensor<B, D> {
        match self {
            Activation::Relu => activation::relu(x),
            Activation::Quadratic => x.clone() * x,
        }
    }
}

/// Host-side weights for one layer in `[out, in]` row-major order
struct LayerWeights {
    weight: Vec<f32>,
    bias: Option<Vec<f32>>,
}

/// Uniform `±1/√fan_in` for weights and bias
fn uniform_layer(d_in: usize, d_out: usize, bias: bool, rng: &mut impl Rng) -> LayerWeights {
    let bound = 1.0 / (d_in as f32).sqrt();
    let dist = Uniform::new_inclusive(-bound, bound);
    LayerWeights {
        weight: (0..d_in * d_out).map(|_| dist.sample(rng)).collect(),
        bias: bias.then(|| (0..d_out).map(|_| dist.sample(rng)).collect()),
    }
}

/// Two-layer weights whose output is identically zero
///
/// Hidden units come in identical pairs and the output weights of each pair
/// are `w` and `-w`, so the pair cancels until training separates it.
fn mirrored_layers(
    d_in: usize,
    hidden: usize,
    d_out: usize,
    bias: bool,
    rng: &mut impl Rng,
) -> crate::error::Result<(LayerWeights, LayerWeights)> {
    if hidden == 0 || hidden % 2 != 0 {
        return Err(LqrError::InvalidConfig(format!(
            "mirrored initialisation needs an even hidden size, got {hidden}"
        )));
    }
    let half = hidden / 2;
    let std = (2.0 / hidden as f32).sqrt();
    let dist = Normal::new(0.0, std)
        .map_err(|err| LqrError::InvalidConfig(format!("mirrored initialisation: {err}")))?;

    let top: Vec<f32> = (0..half * d_in).map(|_| dist.sample(rng)).collect();
    let mut first = top.clone();
    first.extend_from_slice(&top);

    let mut second = Vec::with_capacity(d_out * hidden);
    for _ in 0..d_out {
        let row: Vec<f32> = (0..half).map(|_| dist.sample(rng)).collect();
        second.extend(row.iter().copied());
        second.extend(row.iter().map(|w| -w));
    }

    let hidden_bias = bias.then(|| {
        let half_bias: Vec<f32> = (0..half).map(|_| dist.sample(rng)).collect();
        half_bias.iter().chain(half_bias.iter()).copied().collect()
    });

    Ok((
        LayerWeights {
            weight: first,
            bias: hidden_bias,
        },
        LayerWeights {
            weight: second,
            bias: bias.then(|| vec![0.0; d_out]),
        },
    ))
}

fn two_layers(
    d_in: usize,
    hidden: usize,
    d_out: usize,
    bias: bool,
    mirrored: bool,
    rng: &mut impl Rng,
) -> crate::error::Result<(LayerWeights, LayerWeights)> {
    if mirrored {
        mirrored_layers(d_in, hidden, d_out, bias, rng)
    } else {
        let first = uniform_layer(d_in, hidden, bias, rng);
        let second = uniform_layer(hidden, d_out, bias, rng);
        Ok((first, second))
    }
}

/// Linear layer from `[out, in]` weights; Burn stores them as `[in, out]`
fn build_linear<B: Backend>(
    d_in: usize,
    d_out: usize,
    weights: LayerWeights,
    device: &B::Device,
) -> Linear<B> {
    let mut linear = LinearConfig::new(d_in, d_out)
        .with_bias(weights.bias.is_some())
        .init(device);

    let w = &weights.weight;
    let transposed: Vec<f32> = (0..d_in)
        .flat_map(|i| (0..d_out).map(move |j| w[j * d_in + i]))
        .collect();
    linear.weight = Param::from_tensor(tensor_from_rows(transposed, d_in, d_out, device));
    linear.bias = weights
        .bias
        .map(|bias| Param::from_tensor(tensor_from_vec(bias, device)));

    linear
}

/// Mean network of a Gaussian policy: Linear → ReLU → Linear
#[derive(Module, Debug)]
pub struct GaussianActor<B: Backend> {
    hidden: Linear<B>,
    output: Linear<B>,
}

impl<B: Backend> GaussianActor<B> {
    pub fn forward(&self, state: Tensor<B, 2>) -> Tensor<B, 2> {
        let x = self.hidden.forward(state);
        let x = Activation::Relu.forward(x);
        self.output.forward(x)
    }
}

#[derive(Config, Debug)]
pub struct GaussianActorConfig {
    pub state_size: usize,
    pub action_size: usize,
    #[config(default = 64)]
    pub hidden_size: usize,
    #[config(default = false)]
    pub bias: bool,
    #[config(default = false)]
    pub mirrored: bool,
}

impl GaussianActorConfig {
    pub fn init<B: Backend>(
        &self,
        rng: &mut impl Rng,
        device: &B::Device,
    ) -> crate::error::Result<GaussianActor<B>> {
        let (first, second) = two_layers(
            self.state_size,
            self.hidden_size,
            self.action_size,
            self.bias,
            self.mirrored,
            rng,
        )?;

        Ok(GaussianActor {
            hidden: build_linear(self.state_size, self.hidden_size, first, device),
            output: build_linear(self.hidden_size, self.action_size, second, device),
        })
    }
}

/// Scalar quadratic form of the input: Linear → x² → Linear
///
/// Used as the state-value critic for PPO and as the cost-valued Q function
/// over `[state, action]` for the energy-based agent.
#[derive(Module, Debug)]
pub struct QuadraticCritic<B: Backend> {
    hidden: Linear<B>,
    output: Linear<B>,
}

impl<B: Backend> QuadraticCritic<B> {
    /// `[batch, input]` → `[batch, 1]`
    pub fn forward(&self, input: Tensor<B, 2>) -> Tensor<B, 2> {
        let x = self.hidden.forward(input);
        let x = Activation::Quadratic.forward(x);
        self.output.forward(x)
    }
}

#[derive(Config, Debug)]
pub struct QuadraticCriticConfig {
    pub input_size: usize,
    #[config(default = 64)]
    pub hidden_size: usize,
    #[config(default = false)]
    pub bias: bool,
    #[config(default = false)]
    pub mirrored: bool,
}

impl QuadraticCriticConfig {
    pub fn init<B: Backend>(
        &self,
        rng: &mut impl Rng,
        device: &B::Device,
    ) -> crate::error::Result<QuadraticCritic<B>> {
        let (first, second) = two_layers(
            self.input_size,
            self.hidden_size,
            1,
            self.bias,
            self.mirrored,
            rng,
        )?;

        Ok(QuadraticCritic {
            hidden: build_linear(self.input_size, self.hidden_size, first, device),
            output: build_linear(self.hidden_size, 1, second, device),
        })
    }
}
