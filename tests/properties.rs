use candle_core::{Device, Tensor};
use proptest::prelude::*;

use gpt_gen::inference::{argmax, top_k_filter_in_place};
use gpt_gen::model::{GptConfig, GptModel, normalize};

fn arb_row() -> impl Strategy<Value = Vec<f32>> {
    prop::collection::vec(-10.0f32..10.0, 4..32).prop_filter("row needs spread", |row| {
        let max = row.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        let min = row.iter().copied().fold(f32::INFINITY, f32::min);
        max - min > 1.0
    })
}

fn tiny_model() -> GptModel {
    let config = GptConfig {
        vocab_size: 50,
        context_length: 16,
        emb_dim: 8,
        n_heads: 2,
        n_layers: 2,
        drop_rate: 0.1,
        qkv_bias: true,
    };
    GptModel::seeded(config, 11, &Device::Cpu).unwrap()
}

fn position_logits(model: &GptModel, ids: &[u32]) -> Vec<Vec<f32>> {
    let input = Tensor::new(ids, &Device::Cpu).unwrap().unsqueeze(0).unwrap();
    model
        .forward(&input)
        .unwrap()
        .squeeze(0)
        .unwrap()
        .to_vec2()
        .unwrap()
}

proptest! {
    /// Normalized rows have zero mean and unit (biased) variance.
    #[test]
    fn normalized_rows_are_standardized(row in arb_row()) {
        let n = row.len();
        let x = Tensor::from_vec(row, (1, n), &Device::Cpu).unwrap();
        let y: Vec<f32> = normalize(&x).unwrap().flatten_all().unwrap().to_vec1().unwrap();

        #[allow(clippy::cast_precision_loss)]
        let len = n as f32;
        let mean = y.iter().sum::<f32>() / len;
        let var = y.iter().map(|v| (v - mean).powi(2)).sum::<f32>() / len;
        prop_assert!(mean.abs() < 1e-4, "mean {mean}");
        prop_assert!((var - 1.0).abs() < 2e-3, "variance {var}");
    }

    /// Changing the token at position j never changes logits before j.
    #[test]
    fn earlier_positions_ignore_later_tokens(
        ids in prop::collection::vec(0u32..50, 2..16),
        pick in any::<prop::sample::Index>(),
        replacement in 0u32..50,
    ) {
        let model = tiny_model();
        let j = 1 + pick.index(ids.len() - 1);
        let mut perturbed = ids.clone();
        perturbed[j] = replacement;

        let a = position_logits(&model, &ids);
        let b = position_logits(&model, &perturbed);
        for pos in 0..j {
            for (x, y) in a[pos].iter().zip(&b[pos]) {
                prop_assert!((x - y).abs() < 1e-5, "position {pos} changed: {x} vs {y}");
            }
        }
    }

    /// Top-k keeps exactly k finite entries, and the arg-max survives filtering.
    #[test]
    fn top_k_keeps_exactly_k(
        logits in prop::collection::vec(-5.0f32..5.0, 1..64),
        k in 1usize..80,
    ) {
        let best = argmax(&logits);
        let mut filtered = logits.clone();
        top_k_filter_in_place(&mut filtered, k);

        let kept = filtered.iter().filter(|v| v.is_finite()).count();
        prop_assert_eq!(kept, k.min(logits.len()));
        prop_assert_eq!(argmax(&filtered), best);
    }
}
