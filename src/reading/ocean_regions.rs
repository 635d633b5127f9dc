//! NOAA STAR ocean regions and the coastal countries bordering each.
//!
//! Every region publishes its own altimetry CSV. Regional series are rebased
//! one region at a time, so each starts from its own zero.

use std::collections::{BTreeMap, BTreeSet};

use tracing::warn;

use super::sea_level::{rebase, SeaLevelReading};
use crate::{
    error::StoreError,
    table::{Table, Value},
};

pub const REGION_COLUMN: &str = "Region";
pub const YEAR_COLUMN: &str = "Year";
pub const MONTH_COLUMN: &str = "Month";
pub const SEA_LEVEL_COLUMN: &str = "Sea_Level_mm";
pub const COUNTRY_COLUMN: &str = "Country";
pub const OCEAN_REGIONS_COLUMN: &str = "Ocean_Regions";
pub const NUMBER_OF_OCEANS_COLUMN: &str = "Number_of_Oceans";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OceanRegion {
    /// Short code used in the STAR file names.
    pub code: &'static str,
    pub name: &'static str,
    pub countries: &'static [&'static str],
}

impl OceanRegion {
    pub fn star_file(&self) -> String {
        format!("slr_sla_{}_free_ref_90.csv", self.code)
    }
}

pub const OCEAN_REGIONS: [OceanRegion; 22] = [
    OceanRegion {
        code: "pac",
        name: "Pacific Ocean",
        countries: &[
            "United States", "Japan", "China", "Australia", "New Zealand", "Philippines",
            "Indonesia", "Chile", "Peru", "Ecuador", "Colombia", "Mexico", "Canada",
            "Papua New Guinea", "Fiji", "Samoa", "Tonga", "Kiribati", "Marshall Islands",
            "Micronesia", "Palau", "Vanuatu", "Solomon Islands", "Nauru", "Tuvalu",
        ],
    },
    OceanRegion {
        code: "npac",
        name: "North Pacific Ocean",
        countries: &[
            "United States", "Canada", "Japan", "Russia", "China", "South Korea", "North Korea",
        ],
    },
    OceanRegion {
        code: "atl",
        name: "Atlantic Ocean",
        countries: &[
            "United States", "Canada", "United Kingdom", "Ireland", "France", "Spain", "Portugal",
            "Brazil", "Argentina", "Uruguay", "Venezuela", "Colombia", "Guyana", "Suriname",
            "French Guiana", "Morocco", "Mauritania", "Senegal", "Gambia", "Guinea-Bissau",
            "Guinea", "Sierra Leone", "Liberia", "Ivory Coast", "Ghana", "Togo", "Benin",
            "Nigeria", "Cameroon", "Gabon", "Congo", "Democratic Republic of Congo", "Angola",
            "Namibia", "South Africa",
        ],
    },
    OceanRegion {
        code: "natl",
        name: "North Atlantic Ocean",
        countries: &[
            "United States", "Canada", "United Kingdom", "Ireland", "Iceland", "Norway", "France",
            "Spain", "Portugal", "Morocco",
        ],
    },
    OceanRegion {
        code: "ind",
        name: "Indian Ocean",
        countries: &[
            "India", "Pakistan", "Bangladesh", "Sri Lanka", "Maldives", "Myanmar", "Thailand",
            "Indonesia", "Australia", "South Africa", "Mozambique", "Tanzania", "Kenya",
            "Somalia", "Yemen", "Oman", "Iran", "Madagascar", "Mauritius", "Seychelles",
            "Comoros",
        ],
    },
    OceanRegion {
        code: "car",
        name: "Caribbean Sea",
        countries: &[
            "Cuba", "Jamaica", "Haiti", "Dominican Republic", "Puerto Rico",
            "Trinidad and Tobago", "Barbados", "Bahamas", "Grenada", "Saint Lucia",
            "Saint Vincent and the Grenadines", "Antigua and Barbuda", "Dominica",
            "Saint Kitts and Nevis", "Venezuela", "Colombia", "Panama", "Costa Rica", "Nicaragua",
            "Honduras", "Belize", "Mexico",
        ],
    },
    OceanRegion {
        code: "med",
        name: "Mediterranean Sea",
        countries: &[
            "Spain", "France", "Italy", "Greece", "Turkey", "Cyprus", "Syria", "Lebanon",
            "Israel", "Egypt", "Libya", "Tunisia", "Algeria", "Morocco", "Malta", "Slovenia",
            "Croatia", "Bosnia and Herzegovina", "Montenegro", "Albania",
        ],
    },
    OceanRegion {
        code: "gom",
        name: "Gulf of America",
        countries: &[
            "United States", "Mexico", "Cuba",
        ],
    },
    OceanRegion {
        code: "scs",
        name: "South China Sea",
        countries: &[
            "China", "Vietnam", "Philippines", "Malaysia", "Indonesia", "Singapore", "Brunei",
            "Thailand", "Cambodia",
        ],
    },
    OceanRegion {
        code: "bob",
        name: "Bay of Bengal",
        countries: &[
            "India", "Bangladesh", "Myanmar", "Sri Lanka", "Thailand",
        ],
    },
    OceanRegion {
        code: "ara",
        name: "Arabian Sea",
        countries: &[
            "India", "Pakistan", "Iran", "Oman", "Yemen", "Somalia", "Maldives",
        ],
    },
    OceanRegion {
        code: "pgu",
        name: "Persian Gulf",
        countries: &[
            "Iran", "Iraq", "Kuwait", "Saudi Arabia", "Bahrain", "Qatar", "United Arab Emirates",
            "Oman",
        ],
    },
    OceanRegion {
        code: "nos",
        name: "North Sea",
        countries: &[
            "United Kingdom", "Norway", "Denmark", "Germany", "Netherlands", "Belgium", "France",
        ],
    },
    OceanRegion {
        code: "bal",
        name: "Baltic Sea",
        countries: &[
            "Sweden", "Finland", "Russia", "Estonia", "Latvia", "Lithuania", "Poland", "Germany",
            "Denmark",
        ],
    },
    OceanRegion {
        code: "adr",
        name: "Adriatic Sea",
        countries: &[
            "Italy", "Slovenia", "Croatia", "Bosnia and Herzegovina", "Montenegro", "Albania",
        ],
    },
    OceanRegion {
        code: "soj",
        name: "Sea of Japan",
        countries: &[
            "Japan", "Russia", "South Korea", "North Korea",
        ],
    },
    OceanRegion {
        code: "yes",
        name: "Yellow Sea",
        countries: &[
            "China", "South Korea", "North Korea",
        ],
    },
    OceanRegion {
        code: "ber",
        name: "Bering Sea",
        countries: &[
            "United States", "Russia",
        ],
    },
    OceanRegion {
        code: "oko",
        name: "Sea of Okhotsk",
        countries: &[
            "Russia", "Japan",
        ],
    },
    OceanRegion {
        code: "and",
        name: "Andaman Sea",
        countries: &[
            "Myanmar", "Thailand", "Indonesia", "India",
        ],
    },
    OceanRegion {
        code: "ins",
        name: "Indonesian Seas",
        countries: &[
            "Indonesia", "Malaysia", "Philippines", "Singapore", "Brunei", "Timor-Leste",
        ],
    },
    OceanRegion {
        code: "soc",
        name: "Southern Ocean",
        countries: &[
            "Antarctica", "Chile", "Argentina", "South Africa", "Australia", "New Zealand",
        ],
    },
];

/// One region's monthly readings.
#[derive(Debug, Clone, PartialEq)]
pub struct RegionalSeries {
    pub region: &'static str,
    pub readings: Vec<SeaLevelReading>,
}

/// Rebases each region on its own `baseline_year` mean. Regions without
/// readings in that year are left as published.
pub fn rebase_regions(series: &mut [RegionalSeries], baseline_year: i64) {
    for s in series.iter_mut() {
        if rebase(&mut s.readings, baseline_year).is_none() {
            warn!("{}: no readings in {baseline_year}, left unrebased", s.region);
        }
    }
}

/// `{Region, Year, Month, Sea_Level_mm}`, one row per reading.
pub fn regional_table(series: &[RegionalSeries]) -> Result<Table, StoreError> {
    let mut table = Table::new([REGION_COLUMN, YEAR_COLUMN, MONTH_COLUMN, SEA_LEVEL_COLUMN]);
    for s in series {
        for r in &s.readings {
            table.push_row(vec![
                Value::Text(s.region.to_string()),
                Value::Integer(r.year),
                Value::Integer(i64::from(r.month)),
                Value::Float(r.gmsl_mm),
            ])?;
        }
    }
    Ok(table)
}

/// Yearly mean per region, sorted by region then year.
pub fn regional_yearly(series: &[RegionalSeries]) -> Result<Table, StoreError> {
    let mut groups: BTreeMap<(&str, i64), (f64, usize)> = BTreeMap::new();
    for s in series {
        for r in &s.readings {
            let entry = groups.entry((s.region, r.year)).or_default();
            entry.0 += r.gmsl_mm;
            entry.1 += 1;
        }
    }

    let mut table = Table::new([REGION_COLUMN, YEAR_COLUMN, SEA_LEVEL_COLUMN]);
    for ((region, year), (sum, n)) in groups {
        table.push_row(vec![
            Value::Text(region.to_string()),
            Value::Integer(year),
            Value::Float(sum / n as f64),
        ])?;
    }
    Ok(table)
}

/// `{Country, Ocean_Regions, Number_of_Oceans}` with countries and their
/// regions in alphabetical order.
pub fn country_mapping() -> Result<Table, StoreError> {
    let mut countries: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
    for region in &OCEAN_REGIONS {
        for country in region.countries {
            countries.entry(*country).or_default().insert(region.name);
        }
    }

    let mut table = Table::new([COUNTRY_COLUMN, OCEAN_REGIONS_COLUMN, NUMBER_OF_OCEANS_COLUMN]);
    for (country, regions) in countries {
        table.push_row(vec![
            Value::Text(country.to_string()),
            Value::Text(regions.iter().copied().collect::<Vec<_>>().join(", ")),
            Value::Integer(regions.len() as i64),
        ])?;
    }
    Ok(table)
}

// -- Tests -------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn reading(year: i64, month: u32, gmsl_mm: f64) -> SeaLevelReading {
        SeaLevelReading {
            year,
            month,
            gmsl_mm,
            std_dev_mm: 5.0,
        }
    }

    fn series() -> Vec<RegionalSeries> {
        vec![
            RegionalSeries {
                region: "Pacific Ocean",
                readings: vec![reading(2019, 1, 10.0), reading(2019, 7, 20.0), reading(2020, 1, 30.0)],
            },
            RegionalSeries {
                region: "Baltic Sea",
                readings: vec![reading(2019, 1, -4.0), reading(2020, 1, 2.0)],
            },
        ]
    }

    #[test]
    fn should_have_unique_region_codes() {
        let codes: BTreeSet<&str> = OCEAN_REGIONS.iter().map(|r| r.code).collect();
        assert_eq!(codes.len(), OCEAN_REGIONS.len());
        assert_eq!(OCEAN_REGIONS[0].star_file(), "slr_sla_pac_free_ref_90.csv");
    }

    #[test]
    fn should_rebase_each_region_on_its_own() {
        let mut series = series();

        rebase_regions(&mut series, 2019);

        assert_eq!(series[0].readings[0].gmsl_mm, -5.0);
        assert_eq!(series[0].readings[2].gmsl_mm, 15.0);
        assert_eq!(series[1].readings[0].gmsl_mm, 0.0);
        assert_eq!(series[1].readings[1].gmsl_mm, 6.0);
    }

    #[test]
    fn should_flatten_regions_with_region_column() {
        let table = regional_table(&series()).unwrap();

        assert_eq!(table.columns(), ["Region", "Year", "Month", "Sea_Level_mm"]);
        assert_eq!(table.len(), 5);
        assert_eq!(table.rows()[3][0], Value::Text("Baltic Sea".into()));
    }

    #[test]
    fn should_average_regions_per_year() {
        let table = regional_yearly(&series()).unwrap();

        assert_eq!(table.len(), 4);
        assert_eq!(
            table.rows()[2],
            vec![Value::Text("Pacific Ocean".into()), Value::Integer(2019), Value::Float(15.0)]
        );
        assert_eq!(table.rows()[0][0], Value::Text("Baltic Sea".into()));
    }

    #[test]
    fn should_map_countries_to_every_bordering_region() {
        let table = country_mapping().unwrap();

        let oman = table
            .rows()
            .iter()
            .find(|row| row[0] == Value::Text("Oman".into()))
            .unwrap();
        assert_eq!(
            oman[1],
            Value::Text("Arabian Sea, Indian Ocean, Persian Gulf".into())
        );
        assert_eq!(oman[2], Value::Integer(3));
        let names: Vec<&Value> = table.column("Country").collect();
        let mut sorted = names.clone();
        sorted.sort_by_key(|v| v.to_string());
        assert_eq!(names, sorted);
    }
}
