use std::cell::RefCell;

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use super::{Bit, Model, ScaledFreq};
use crate::mixers::{from_mix_domain, stretch, to_mix_domain, LogisticMixer};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogisticMixModelOptions {
    pub recip_learning_rate: u32,
    pub precision: u32,
}

type Stretched = SmallVec<[i32; 16]>;

/// What the last `predict` saw, reused by the `update` that follows it
struct Mixed {
    ctx: u32,
    inputs: Stretched,
    p: i32,
}

/// Mixes sub-model predictions in the logit domain with online weights
pub struct LogisticMixModel {
    models: Vec<Box<dyn Model>>,
    mixer: LogisticMixer,
    precision: u32,
    last: RefCell<Option<Mixed>>,
}

impl LogisticMixModel {
    pub fn new(models: Vec<Box<dyn Model>>, options: &LogisticMixModelOptions) -> Self {
        let mixer = LogisticMixer::new(models.len(), options.recip_learning_rate);
        Self { models, mixer, precision: options.precision, last: RefCell::new(None) }
    }

    fn stretched(&self, ctx: u32) -> Stretched {
        self.models
            .iter()
            .map(|model| stretch(to_mix_domain(model.predict(ctx), self.precision)))
            .collect()
    }

    pub fn models(&self) -> &[Box<dyn Model>] {
        &self.models
    }

    pub fn weights(&self) -> &[i32] {
        self.mixer.weights()
    }
}

impl Model for LogisticMixModel {
    fn predict(&self, ctx: u32) -> ScaledFreq {
        let inputs = self.stretched(ctx);
        let p = self.mixer.mix(&inputs);
        self.last.replace(Some(Mixed { ctx, inputs, p }));
        from_mix_domain(p, self.precision)
    }

    fn update(&mut self, bit: Bit, ctx: u32) {
        // sub-models haven't learnt the bit yet, so a fresh mix equals what predict saw
        let last = self.last.get_mut().take();
        let (inputs, p) = match last {
            Some(mixed) if mixed.ctx == ctx => (mixed.inputs, mixed.p),
            _ => {
                let inputs = self.stretched(ctx);
                let p = self.mixer.mix(&inputs);
                (inputs, p)
            }
        };
        self.mixer.train(&inputs, p, bit);
        for model in &mut self.models {
            model.update(bit, ctx);
        }
    }

    fn flush_byte(&mut self, current_byte: u32, in_bits: u32) {
        *self.last.get_mut() = None;
        for model in &mut self.models {
            model.flush_byte(current_byte, in_bits);
        }
    }

    fn release(&mut self) {
        for model in &mut self.models {
            model.release();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DirectContextModel, DirectContextModelOptions, DEFAULT_CONTEXT};

    /// Always says the same thing
    struct Fixed(ScaledFreq);

    impl Model for Fixed {
        fn predict(&self, _ctx: u32) -> ScaledFreq {
            self.0
        }
        fn update(&mut self, _bit: Bit, _ctx: u32) {}
        fn flush_byte(&mut self, _current_byte: u32, _in_bits: u32) {}
    }

    /// Counts the calls it gets
    #[derive(Default)]
    struct Counting {
        predicts: std::rc::Rc<std::cell::Cell<u32>>,
        updates: std::rc::Rc<std::cell::Cell<u32>>,
        flushes: std::rc::Rc<std::cell::Cell<u32>>,
        releases: std::rc::Rc<std::cell::Cell<u32>>,
    }

    impl Model for Counting {
        fn predict(&self, _ctx: u32) -> ScaledFreq {
            self.predicts.set(self.predicts.get() + 1);
            1 << 15
        }
        fn update(&mut self, _bit: Bit, _ctx: u32) {
            self.updates.set(self.updates.get() + 1);
        }
        fn flush_byte(&mut self, _current_byte: u32, _in_bits: u32) {
            self.flushes.set(self.flushes.get() + 1);
        }
        fn release(&mut self) {
            self.releases.set(self.releases.get() + 1);
        }
    }

    const OPTIONS: LogisticMixModelOptions = LogisticMixModelOptions { recip_learning_rate: 100, precision: 16 };

    #[test]
    fn learns_which_model_to_trust() {
        let models: Vec<Box<dyn Model>> = vec![Box::new(Fixed(60000)), Box::new(Fixed(5000))];
        let mut mix = LogisticMixModel::new(models, &OPTIONS);
        for _ in 0..2000 {
            mix.update(1, DEFAULT_CONTEXT);
        }
        assert!(mix.predict(DEFAULT_CONTEXT) > 60000);
        assert!(mix.weights()[0] > mix.weights()[1]);
    }

    #[test]
    fn fans_out_every_call() {
        let counting = Counting::default();
        let (updates, flushes, releases) = (counting.updates.clone(), counting.flushes.clone(), counting.releases.clone());
        let models: Vec<Box<dyn Model>> = vec![Box::new(counting), Box::new(Fixed(1 << 15))];
        let mut mix = LogisticMixModel::new(models, &OPTIONS);
        mix.update(0, DEFAULT_CONTEXT);
        mix.update(1, DEFAULT_CONTEXT);
        mix.flush_byte(1, 2);
        mix.release();
        assert_eq!((updates.get(), flushes.get(), releases.get()), (2, 1, 1));
        assert_eq!(mix.models().len(), 2);
    }

    #[test]
    fn update_reuses_the_prediction() {
        let counting = Counting::default();
        let predicts = counting.predicts.clone();
        let models: Vec<Box<dyn Model>> = vec![Box::new(counting)];
        let mut mix = LogisticMixModel::new(models, &OPTIONS);

        mix.predict(7);
        mix.update(1, 7);
        assert_eq!(predicts.get(), 1);

        // nothing to reuse: no prediction, or one for another context
        mix.update(1, 7);
        assert_eq!(predicts.get(), 2);
        mix.predict(3);
        mix.update(0, 7);
        assert_eq!(predicts.get(), 4);

        mix.predict(7);
        mix.flush_byte(0, 8);
        mix.update(0, 7);
        assert_eq!(predicts.get(), 6);
    }

    #[test]
    fn predicted_and_unpredicted_updates_agree() {
        let build = || {
            let options = |context_bits| DirectContextModelOptions {
                in_bits: 8,
                context_bits,
                precision: 16,
                model_max_count: 5,
                model_recip_base_count: 20,
            };
            let models: Vec<Box<dyn Model>> = vec![
                Box::new(DirectContextModel::new(&options(8), None).unwrap()),
                Box::new(DirectContextModel::new(&options(12), None).unwrap()),
            ];
            LogisticMixModel::new(models, &OPTIONS)
        };
        let (mut predicted, mut unpredicted) = (build(), build());
        for (i, &byte) in b"mixing mixes mixed mixers".iter().enumerate() {
            let ctx = i as u32 % 3;
            for k in (0..8).rev() {
                let bit = (byte >> k) & 1;
                predicted.predict(ctx);
                predicted.update(bit, ctx);
                unpredicted.update(bit, ctx);
            }
            predicted.flush_byte(u32::from(byte), 8);
            unpredicted.flush_byte(u32::from(byte), 8);
        }
        assert_eq!(predicted.weights(), unpredicted.weights());
        assert_eq!(predicted.predict(DEFAULT_CONTEXT), unpredicted.predict(DEFAULT_CONTEXT));
    }

    #[test]
    fn stays_in_bounds_under_adversarial_inputs() {
        let models: Vec<Box<dyn Model>> = vec![Box::new(Fixed(65535)), Box::new(Fixed(1)), Box::new(Fixed(65535))];
        let mut mix = LogisticMixModel::new(models, &LogisticMixModelOptions { recip_learning_rate: 1, precision: 16 });
        for i in 0..5000 {
            let p = mix.predict(DEFAULT_CONTEXT);
            assert!(p > 0 && p < 1 << 16);
            mix.update((i % 5 == 0).into(), DEFAULT_CONTEXT);
        }
    }
}
