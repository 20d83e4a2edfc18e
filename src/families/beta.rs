//! LogLog-Beta bias correction for the packed family.
//!
//! Paper: https://arxiv.org/pdf/1612.02284.pdf

use crate::variant::{MAX_PRECISION, MIN_PRECISION};

/// Evaluate `beta(z)` for `precision` with Horner's method, where `z` is the number of
/// zero registers.
#[inline]
pub(crate) fn beta(zeros: f64, precision: u8) -> f64 {
    debug_assert!((MIN_PRECISION..=MAX_PRECISION).contains(&precision));
    let coefficients = &COEFFICIENTS[usize::from(precision - MIN_PRECISION)];
    let zl = (zeros + 1.0).ln();
    let tail = coefficients[1..]
        .iter()
        .rev()
        .fold(0.0, |acc, &c| acc * zl + c);
    tail * zl + coefficients[0] * zeros
}

/// Polynomial coefficients `[b0, b1, .., b7]`, one row per precision starting at 4.
#[rustfmt::skip]
const COEFFICIENTS: [[f64; 8]; 15] = [
    [-0.582581413904517, -1.93530035756005, 11.079323758035073, -22.131357446444323, 22.505391846630037, -12.000723834917984, 3.220579408194167, -0.342225302271235], // 4
    [-0.7518999460733967, -0.959003007774876, 5.59973713221416, -8.209763699976552, 6.509125489447204, -2.683029373432373, 0.5612891113138221, -0.0463331622196545], // 5
    [29.825790096961963, -31.328708333772592, -10.594252303658228, -11.572012568909962, 3.818875437390749, -2.416013032853081, 0.4542208940970826, -0.057515545202042], // 6
    [2.810292129082006, -3.9780498518175995, 1.3162680041351582, -3.92524863358059, 2.008083575394647, -0.7527151937556955, 0.1265569894242751, -0.010994643872624], // 7
    [1.0063354488755052, -2.005806664051124, 1.6436974936651412, -2.7056080994056617, 1.392099802442226, -0.4647037427218319, 0.07384282377269775, -0.00578554885254223], // 8
    [-0.09415657458167959, -0.7813097592455053, 1.7151494675071246, -1.7371125040651634, 0.8644150848904892, -0.23819027465047218, 0.03343448400269076, -0.00207858528178157], // 9
    [-0.25935400670790054, -0.5259830199980581, 1.4893303492587684, -1.2964271408499357, 0.6228475621722162, -0.1567232677025104, 0.02054415903878563, -0.00112488483925502], // 10
    [-0.432325553856025, -0.108450736399632, 0.60915655074112, -0.016568780184518, -0.0795829341087617, 0.0471830602102918, -0.00781372902346934, 0.000584268708489995], // 11
    [-0.384979202588598, 0.183162233114364, 0.130396688841854, 0.0704838927629266, -0.00895893971464453, 0.0113010036741605, -0.0019428556959129, 0.000225435774024964], // 12
    [-0.41655270946462997, -0.22146677040685156, 0.38862131236999947, 0.4534097974606237, -0.36264738324476375, 0.12304650053558529, -0.0170154038455551, 0.00102750367080838], // 13
    [-0.371009760230692, 0.00978811941207509, 0.185796293324165, 0.203015527328432, -0.116710521803686, 0.043110669949282, -0.00599583540511831, 0.000449704299509437], // 14
    [-0.38215145543875273, -0.8906940053609084, 0.3760233577467887, 0.9933597744068238, -0.6557744163831896, 0.1833234212970361, -0.02241529633062872, 0.00121399789330194], // 15
    [-0.3733187664375306, -1.41704077448123, 0.40729184796612533, 1.5615203390658416, -0.9924223353428613, 0.2606468139948309, -0.03053811369682807, 0.00155770210179105], // 16
    [-0.36775502299404605, 0.5383142235137797, 0.7697028927876792, 0.5500258358645056, -0.7457558826114694, 0.2571183578582195, -0.03437902606864149, 0.00185949146371616], // 17
    [-0.3647962332596054, 0.9973041232863503, 1.5535438623008122, 1.2593267719802892, -1.5332594820911016, 0.4780104220005659, -0.05951025172951174, 0.00291076804642205], // 18
];
