#![allow(non_upper_case_globals)]
#![allow(non_snake_case)]
#![allow(non_camel_case_types)]
#![allow(clippy::upper_case_acronyms)]

// Base length is the millimeter and base current the milliampere, so the
// stored value of an ElectricPotential is in millivolts.
ISQ!(
    uom::si,
    f32,
    (
        millimeter,
        kilogram,
        second,
        milliampere,
        kelvin,
        mole,
        candela
    )
);

#[cfg(test)]
mod tests {
    use super::{ElectricPotential, ElectricalResistance, ThermodynamicTemperature};
    use approx::assert_relative_eq;
    use uom::si::{
        electric_potential::{microvolt, millivolt, volt},
        electrical_resistance::{kiloohm, ohm},
        thermodynamic_temperature::{degree_celsius, kelvin},
    };

    #[test]
    fn potential_is_stored_in_millivolts() {
        let cell = ElectricPotential::new::<volt>(3.7);
        assert_relative_eq!(cell.value, 3700.0, epsilon = 1e-3);
        assert_relative_eq!(cell.get::<millivolt>(), 3700.0, epsilon = 1e-3);

        let cc_lsb = ElectricPotential::new::<microvolt>(8.44);
        assert_relative_eq!(cc_lsb.get::<millivolt>(), 0.00844, epsilon = 1e-7);
    }

    #[test]
    fn resistance_and_temperature_conversions() {
        let r = ElectricalResistance::new::<kiloohm>(10.0);
        assert_relative_eq!(r.get::<ohm>(), 10_000.0, epsilon = 1e-2);

        let t = ThermodynamicTemperature::new::<degree_celsius>(25.0);
        assert_relative_eq!(t.get::<kelvin>(), 298.15, epsilon = 1e-3);
    }
}
