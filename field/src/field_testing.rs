/// Exercises the ring axioms, inversion, and the byte codec of a field type.
#[macro_export]
macro_rules! test_field_arithmetic {
    ($field:ty) => {
        mod field_arithmetic {
            use rand::{Rng, SeedableRng};
            use rand_chacha::ChaCha8Rng;

            use $crate::types::{Field, Sample};

            type F = $field;

            fn sample_vec(n: usize) -> Vec<F> {
                let mut rng = ChaCha8Rng::seed_from_u64(0x6d696e7573);
                (0..n).map(|_| F::sample(&mut rng)).collect()
            }

            #[test]
            fn batch_inversion() {
                for n in 0..20usize {
                    let xs = (1..=n as u64).map(F::from_canonical_u64).collect::<Vec<_>>();
                    let invs = F::batch_multiplicative_inverse(&xs);
                    assert_eq!(invs.len(), n);
                    for (x, inv) in xs.into_iter().zip(invs) {
                        assert_eq!(x * inv, F::ONE);
                    }
                }
            }

            #[test]
            fn ring_axioms() {
                let xs = sample_vec(8);
                let ys = sample_vec(8);
                let zs = sample_vec(8);
                for ((&x, &y), &z) in xs.iter().zip(&ys).zip(&zs) {
                    assert_eq!(x + y, y + x);
                    assert_eq!(x * y, y * x);
                    assert_eq!((x + y) + z, x + (y + z));
                    assert_eq!((x * y) * z, x * (y * z));
                    assert_eq!(x * (y + z), x * y + x * z);
                    assert_eq!(x + F::ZERO, x);
                    assert_eq!(x * F::ONE, x);
                    assert_eq!(x * F::ZERO, F::ZERO);
                    assert_eq!(x - x, F::ZERO);
                    assert_eq!(x + (-x), F::ZERO);
                    assert_eq!(-(-x), x);
                    assert_eq!(x.double(), x + x);
                    assert_eq!(x.square(), x * x);
                }
            }

            #[test]
            fn inversion() {
                assert_eq!(F::ZERO.try_inverse(), None);
                for &x in &sample_vec(8) {
                    if x.is_nonzero() {
                        assert_eq!(x * x.inverse(), F::ONE);
                        assert_eq!(x / x, F::ONE);
                    }
                }
                assert_eq!(F::ONE.inverse(), F::ONE);
                assert_eq!(F::NEG_ONE * F::NEG_ONE, F::ONE);
            }

            #[test]
            fn exponentiation() {
                for &x in &sample_vec(4) {
                    assert_eq!(x.exp_u64(0), F::ONE);
                    assert_eq!(x.exp_u64(1), x);
                    assert_eq!(x.exp_u64(5), x * x * x * x * x);
                }
            }

            #[test]
            fn byte_codec() {
                let mut values = sample_vec(8);
                values.extend([F::ZERO, F::ONE, F::NEG_ONE]);
                for &x in &values {
                    let bytes = x.to_bytes();
                    assert_eq!(bytes.len(), F::ENCODED_LEN);
                    assert_eq!(F::from_bytes(&bytes), Ok(x));
                }
                // The modulus itself must be rejected.
                let order = <F as Field>::order();
                let mut digits = order.to_bytes_be();
                let mut encoded = vec![0u8; F::ENCODED_LEN - digits.len()];
                encoded.append(&mut digits);
                assert_eq!(
                    F::from_bytes(&encoded),
                    Err($crate::errors::FieldError::OutOfRange)
                );
                assert!(F::from_bytes(&[]).is_err());
            }

            #[test]
            fn magnitude_order() {
                let mut rng = ChaCha8Rng::seed_from_u64(42);
                for _ in 0..32 {
                    let a = rng.gen_range(0..1000u64);
                    let b = rng.gen_range(0..1000u64);
                    assert_eq!(
                        F::from_canonical_u64(a).cmp(&F::from_canonical_u64(b)),
                        a.cmp(&b)
                    );
                }
            }

            #[test]
            fn bit_length() {
                assert_eq!(F::ZERO.bits(), 0);
                assert_eq!(F::ONE.bits(), 1);
                assert_eq!(F::from_canonical_u64(255).bits(), 8);
                assert_eq!(F::from_canonical_u64(256).bits(), 9);
                assert_eq!(F::NEG_ONE.bits(), F::BANDWIDTH);
            }
        }
    };
}
