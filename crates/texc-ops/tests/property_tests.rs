//! Property tests for texc-ops
//!
//! These tests check the feasibility oracle against its definition and the
//! depthwise lowering against a direct convolution on random shapes.

mod common;

use common::{assert_close, data, reference, run, Case};
use proptest::prelude::*;
use texc_ir::DType;
use texc_ops::{
    check_conv2d_support, compute_conv2d, conv2d_depthwise_static, Device, LowerConfig,
    TensorInfo, Unsupported,
};

fn info(dims: &[i64]) -> TensorInfo {
    TensorInfo {
        dims: dims.to_vec(),
        dtype: DType::Float32,
    }
}

// ============================================================
// Oracle
// ============================================================

proptest! {
    #[test]
    fn oracle_matches_definition(
        cin in 1i64..6,
        cout in 1i64..6,
        cper_g in 1i64..3,
        groups in 1i64..6,
        kh in 1i64..6,
        kw in 1i64..6,
        stride in (1i64..4, 1i64..4),
        pad in (0i64..3, 0i64..3),
        dilation in (1i64..3, 1i64..3),
    ) {
        let expected = cin == cout
            && cin == groups
            && cper_g == 1
            && kh == 3
            && kw == 3
            && stride.0 == stride.1
            && pad.0 == pad.1
            && dilation == (1, 1);
        let got = check_conv2d_support(
            &info(&[1, cin, 16, 16]),
            &info(&[cout, cper_g, kh, kw]),
            &info(&[cout]),
            [stride.0, stride.1],
            [pad.0, pad.1],
            [dilation.0, dilation.1],
            groups,
        );
        prop_assert_eq!(got.is_ok(), expected);
    }

    #[test]
    fn oracle_single_violation_rejects(
        channels in 1i64..16,
        stride in 1i64..4,
        pad in 0i64..3,
        violation in 0usize..5,
    ) {
        let x = info(&[1, channels, 12, 12]);
        let mut w = info(&[channels, 1, 3, 3]);
        let b = info(&[channels]);
        let base = check_conv2d_support(&x, &w, &b, [stride; 2], [pad; 2], [1, 1], channels);
        prop_assert!(base.is_ok());

        let (mut s, mut p, mut d) = ([stride; 2], [pad; 2], [1, 1]);
        let expected = match violation {
            0 => { w.dtype = DType::Float16; Unsupported::DType }
            1 => { w.dims[3] = 5; Unsupported::KernelSize }
            2 => { s[1] += 1; Unsupported::Stride }
            3 => { p[0] += 1; Unsupported::Padding }
            _ => { d = [1, 2]; Unsupported::Dilation }
        };
        prop_assert_eq!(check_conv2d_support(&x, &w, &b, s, p, d, channels), Err(expected));
    }
}

// ============================================================
// Depthwise lowering
// ============================================================

fn case_strategy() -> impl Strategy<Value = Case> {
    (1i64..3, 1i64..4, 1i64..10, 1i64..10, 1i64..3, 0i64..2)
        .prop_map(|(n, channels, h, w, stride, pad)| Case {
            n,
            channels,
            h,
            w,
            kernel: 3,
            stride,
            pad,
        })
        .prop_filter("padded input smaller than the kernel", |case| {
            case.h + 2 * case.pad >= case.kernel && case.w + 2 * case.pad >= case.kernel
        })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn depthwise_matches_direct_convolution(case in case_strategy(), seed in any::<u32>()) {
        let (x, w, b) = (case.input(), case.weight(), case.bias());
        let xs = data(case.n * case.channels * case.h * case.w, seed);
        let ws = data(case.channels * 9, seed.wrapping_add(1));
        let bs = data(case.channels, seed.wrapping_add(2));

        let lowered = compute_conv2d(
            &case.operands(&x, &w, &b),
            &case.output_shape(),
            None,
            Device::Cpu,
        );
        if let Some(err) = case.peel_error() {
            prop_assert_eq!(lowered, Err(err));
            return Ok(());
        }
        let tensor = lowered.unwrap();
        prop_assert!(tensor.external_call().is_none());

        let got = run(&tensor, &[(&x, &xs[..]), (&w, &ws[..]), (&b, &bs[..])]);
        assert_close(&got, &reference(&case, &xs, &ws, Some(&bs)));
    }

    #[test]
    fn peeling_preserves_results(
        case in case_strategy().prop_filter("peelable", |case| case.peel_error().is_none()),
        seed in any::<u32>(),
    ) {
        let (x, w) = (case.input(), case.weight());
        let xs = data(case.n * case.channels * case.h * case.w, seed);
        let ws = data(case.channels * 9, seed ^ 0x5555);

        let lower = |config: &LowerConfig| {
            conv2d_depthwise_static(&x, &w, None, case.stride, case.pad, case.channels, config)
                .unwrap()
        };
        let peeled = run(&lower(&LowerConfig::default()), &[(&x, &xs[..]), (&w, &ws[..])]);
        let plain = run(&lower(&LowerConfig::unpeeled()), &[(&x, &xs[..]), (&w, &ws[..])]);
        prop_assert_eq!(peeled, plain);
    }
}
