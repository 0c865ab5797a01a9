use std::fs;
use std::path::Path;
use serde::{Deserialize, Serialize};
use serde::de::DeserializeOwned;
use tracing::debug;
use crate::error::Result;
use crate::spin::{Position, Spin, SpinMC};

/// Serde-backed parameter files. `.json` files are read and written as
/// JSON, everything else as TOML.
pub trait ConfigFile: Serialize + DeserializeOwned + Sized {
    fn to_file(&self,filename:&Path) -> Result<()> {
        let s = match is_json(filename) {
            true => serde_json::to_string_pretty(self)?,
            false => toml::to_string_pretty(self)?
        };
        fs::write(filename,s)?;
        debug!(file = %filename.display(),"wrote config");
        Ok(())
    }

    fn from_file(filename:&Path) -> Result<Self> {
        let s = fs::read_to_string(filename)?;
        debug!(file = %filename.display(),"loading config");
        match is_json(filename) {
            true => Ok(serde_json::from_str(&s)?),
            false => Self::from_toml_str(&s)
        }
    }

    fn from_toml_str(s:&str) -> Result<Self> {
        Ok(toml::from_str(s)?)
    }
}

fn is_json(filename:&Path) -> bool {
    filename.extension().map_or(false,|e| e.eq_ignore_ascii_case("json"))
}

/// Single-compartment tissue parameters (ms, Hz, cm).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SpinConfig {
    pub m0:f64,
    pub t1:f64,
    pub t2:f64,
    pub df:f64,
    #[serde(default)]
    pub pos:Position,
}

impl Default for SpinConfig {
    fn default() -> Self {
        SpinConfig{
            m0:1.0,
            t1:1000.0,
            t2:100.0,
            df:0.0,
            pos:Position::default(),
        }
    }
}

impl SpinConfig {
    pub fn build(&self) -> Result<Spin> {
        Ok(Spin::new(self.m0,self.t1,self.t2,self.df)?.with_position(self.pos))
    }
}

impl ConfigFile for SpinConfig {}

/// Multi-compartment tissue parameters. `exchange[i][j]` is the rate (1/ms)
/// from compartment j into compartment i.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SpinMCConfig {
    pub m0:f64,
    pub frac:Vec<f64>,
    pub t1:Vec<f64>,
    pub t2:Vec<f64>,
    pub df:Vec<f64>,
    pub exchange:Vec<Vec<f64>>,
    #[serde(default)]
    pub pos:Position,
}

impl Default for SpinMCConfig {
    /// Two-pool white matter: myelin water exchanging with
    /// intra/extracellular water.
    fn default() -> Self {
        let frac = vec![0.15,0.85];
        let k = 0.01;
        SpinMCConfig{
            m0:1.0,
            exchange:vec![
                vec![0.0,k*frac[0]/frac[1]],
                vec![k,0.0],
            ],
            frac,
            t1:vec![400.0,832.0],
            t2:vec![20.0,80.0],
            df:vec![15.0,0.0],
            pos:Position::default(),
        }
    }
}

impl SpinMCConfig {
    pub fn build(&self) -> Result<SpinMC> {
        let s = SpinMC::new(
            self.m0,
            self.frac.clone(),
            self.t1.clone(),
            self.t2.clone(),
            self.df.clone(),
            self.exchange.clone(),
        )?;
        Ok(s.with_position(self.pos))
    }
}

impl ConfigFile for SpinMCConfig {}
