use serde::{Deserialize, Serialize};

use crate::error::IvpsolError;
use crate::{ode_solver_error, Scalar};

/// The embedded explicit Runge-Kutta pairs available to [super::explicit_rk::ExplicitRk].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RkTableau {
    /// Dormand-Prince 5(4).
    DormandPrince54,
    /// Bogacki-Shampine 3(2).
    BogackiShampine32,
    /// Tsitouras 5(4).
    Tsitouras54,
}

impl RkTableau {
    /// Order of the propagated solution.
    pub fn order(&self) -> usize {
        match self {
            Self::DormandPrince54 | Self::Tsitouras54 => 5,
            Self::BogackiShampine32 => 3,
        }
    }

    pub fn tableau(&self) -> Tableau {
        match self {
            Self::DormandPrince54 => Tableau::dormand_prince54(),
            Self::BogackiShampine32 => Tableau::bogacki_shampine32(),
            Self::Tsitouras54 => Tableau::tsitouras54(),
        }
    }
}

/// Butcher tableau of an explicit method with an embedded error estimate.
///
/// `a` is strictly lower triangular (stored row by row), `b` gives the propagated solution and
/// `d = b - b_hat` the error estimate `h sum_i d_i k_i`. When the last row of `a` equals `b` and
/// `c` ends in one the last stage is `f` at the new state ("first same as last").
#[derive(Debug, Clone)]
pub struct Tableau {
    a: Vec<Vec<Scalar>>,
    b: Vec<Scalar>,
    c: Vec<Scalar>,
    d: Vec<Scalar>,
    order: usize,
    fsal: bool,
}

impl Tableau {
    pub fn new(
        a: Vec<Vec<Scalar>>,
        b: Vec<Scalar>,
        c: Vec<Scalar>,
        d: Vec<Scalar>,
        order: usize,
    ) -> Result<Self, IvpsolError> {
        let s = b.len();
        if s == 0 || c.len() != s || d.len() != s || a.len() != s {
            return Err(ode_solver_error!(
                InvalidTableau,
                format!(
                    "inconsistent number of stages: a {}, b {}, c {}, d {}",
                    a.len(),
                    s,
                    c.len(),
                    d.len()
                )
            ));
        }
        for (i, row) in a.iter().enumerate() {
            if row.len() != i {
                return Err(ode_solver_error!(
                    InvalidTableau,
                    format!("row {i} of a must have {i} entries, got {}", row.len())
                ));
            }
        }
        if c[0] != 0.0 {
            return Err(ode_solver_error!(InvalidTableau, "c[0] must be zero"));
        }
        let fsal = c[s - 1] == 1.0 && b[s - 1] == 0.0 && a[s - 1].as_slice() == &b[..s - 1];
        Ok(Self {
            a,
            b,
            c,
            d,
            order,
            fsal,
        })
    }

    pub fn dormand_prince54() -> Self {
        let a = vec![
            vec![],
            vec![1.0 / 5.0],
            vec![3.0 / 40.0, 9.0 / 40.0],
            vec![44.0 / 45.0, -56.0 / 15.0, 32.0 / 9.0],
            vec![
                19372.0 / 6561.0,
                -25360.0 / 2187.0,
                64448.0 / 6561.0,
                -212.0 / 729.0,
            ],
            vec![
                9017.0 / 3168.0,
                -355.0 / 33.0,
                46732.0 / 5247.0,
                49.0 / 176.0,
                -5103.0 / 18656.0,
            ],
            vec![
                35.0 / 384.0,
                0.0,
                500.0 / 1113.0,
                125.0 / 192.0,
                -2187.0 / 6784.0,
                11.0 / 84.0,
            ],
        ];
        let b = vec![
            35.0 / 384.0,
            0.0,
            500.0 / 1113.0,
            125.0 / 192.0,
            -2187.0 / 6784.0,
            11.0 / 84.0,
            0.0,
        ];
        let c = vec![0.0, 1.0 / 5.0, 3.0 / 10.0, 4.0 / 5.0, 8.0 / 9.0, 1.0, 1.0];
        let d = vec![
            71.0 / 57600.0,
            0.0,
            -71.0 / 16695.0,
            71.0 / 1920.0,
            -17253.0 / 339200.0,
            22.0 / 525.0,
            -1.0 / 40.0,
        ];
        Self::fixed(a, b, c, d, 5)
    }

    pub fn bogacki_shampine32() -> Self {
        let a = vec![
            vec![],
            vec![1.0 / 2.0],
            vec![0.0, 3.0 / 4.0],
            vec![2.0 / 9.0, 1.0 / 3.0, 4.0 / 9.0],
        ];
        let b = vec![2.0 / 9.0, 1.0 / 3.0, 4.0 / 9.0, 0.0];
        let c = vec![0.0, 1.0 / 2.0, 3.0 / 4.0, 1.0];
        let d = vec![-5.0 / 72.0, 1.0 / 12.0, 1.0 / 9.0, -1.0 / 8.0];
        Self::fixed(a, b, c, d, 3)
    }

    pub fn tsitouras54() -> Self {
        let c = vec![0.0, 0.161, 0.327, 0.9, 0.9800255409045097, 1.0, 1.0];
        let b = vec![
            0.09646076681806523,
            0.01,
            0.4798896504144996,
            1.379008574103742,
            -3.290069515436081,
            2.324710524099774,
            0.0,
        ];
        let d = vec![
            -0.001_780_011_052_225_777,
            -0.0008164344596567469,
            0.007880878010261995,
            -0.1447110071732629,
            0.5823571654525552,
            -0.45808210592918697,
            0.015151515151515152,
        ];
        // the first column follows from the row sums matching c
        let mut a = vec![
            vec![],
            vec![0.0],
            vec![0.0, 0.335_480_655_492_357],
            vec![0.0, -6.359448489975075, 4.362295432869581],
            vec![
                0.0,
                -11.74888356406283,
                7.495539342889836,
                -0.09249506636175525,
            ],
            vec![
                0.0,
                -12.92096931784711,
                8.159367898576159,
                -0.071_584_973_281_401,
                -0.02826905039406838,
            ],
            b[..6].to_vec(),
        ];
        for (i, row) in a.iter_mut().enumerate().take(6).skip(1) {
            let rest: Scalar = row[1..].iter().sum();
            row[0] = c[i] - rest;
        }
        Self::fixed(a, b, c, d, 5)
    }

    // built-in tableaus are consistent by construction
    fn fixed(
        a: Vec<Vec<Scalar>>,
        b: Vec<Scalar>,
        c: Vec<Scalar>,
        d: Vec<Scalar>,
        order: usize,
    ) -> Self {
        let s = b.len();
        let fsal = a[s - 1].as_slice() == &b[..s - 1];
        Self {
            a,
            b,
            c,
            d,
            order,
            fsal,
        }
    }

    pub fn order(&self) -> usize {
        self.order
    }

    /// Number of stages.
    pub fn s(&self) -> usize {
        self.b.len()
    }

    pub fn a(&self, i: usize) -> &[Scalar] {
        &self.a[i]
    }

    pub fn b(&self) -> &[Scalar] {
        &self.b
    }

    pub fn c(&self) -> &[Scalar] {
        &self.c
    }

    pub fn d(&self) -> &[Scalar] {
        &self.d
    }

    pub fn is_fsal(&self) -> bool {
        self.fsal
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn check_consistency(tableau: &Tableau) {
        let s = tableau.s();
        for i in 0..s {
            let row_sum: f64 = tableau.a(i).iter().sum();
            assert!((row_sum - tableau.c()[i]).abs() < 1e-12, "row {i}: {row_sum}");
        }
        let b_sum: f64 = tableau.b().iter().sum();
        assert!((b_sum - 1.0).abs() < 1e-12);
        // the embedded solution is also consistent
        let d_sum: f64 = tableau.d().iter().sum();
        assert!(d_sum.abs() < 1e-12, "{d_sum}");
        assert!(tableau.is_fsal());
    }

    #[test]
    fn builtin_tableaus_are_consistent() {
        for kind in [
            RkTableau::DormandPrince54,
            RkTableau::BogackiShampine32,
            RkTableau::Tsitouras54,
        ] {
            let tableau = kind.tableau();
            check_consistency(&tableau);
            assert_eq!(tableau.order(), kind.order());
        }
    }

    #[test]
    fn rejects_malformed_tableau() {
        let err = Tableau::new(vec![vec![], vec![1.0]], vec![0.5, 0.5], vec![0.0], vec![0.0, 0.0], 2)
            .unwrap_err();
        insta::assert_snapshot!(err.to_string(), @"ODE solver error: Invalid Tableau: inconsistent number of stages: a 2, b 2, c 1, d 2");

        let tableau = Tableau::new(
            vec![vec![], vec![1.0]],
            vec![0.5, 0.5],
            vec![0.0, 1.0],
            vec![0.5, -0.5],
            2,
        )
        .unwrap();
        assert!(!tableau.is_fsal());
        assert_eq!(tableau.s(), 2);
    }
}
