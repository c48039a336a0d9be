//! Explicit bind strings
//!
//! Users may bypass the distribution engines by providing a comma-separated
//! bind list, whose interpretation depends on the requested [`BindKind`]. Task
//! `k` uses field `k` of the list, or field `k % len` if the list is shorter
//! than the number of tasks.
//!
//! | Kind     | Field format            | Meaning                               |
//! |----------|-------------------------|---------------------------------------|
//! | `rank`   | none                    | the CPU whose number is the task rank |
//! | `mask`   | hex mask, `0x` optional | the CPUs of the mask                  |
//! | `map`    | decimal or `0x` hex     | a single CPU                          |
//! | `ldrank` | none                    | the domain whose number is the rank   |
//! | `ldmask` | hex mask, `0x` optional | the domains of the mask               |
//! | `ldmap`  | decimal or `0x` hex     | a single domain                       |

use super::{
    policy::{CpuBindType, StepLayout},
    PlacementContext,
};
use crate::{
    bitmap::{Bitmap, ParseBitmapError},
    cpu::cpuset::{CpuSet, MAX_CPUS},
};
#[allow(unused)]
#[cfg(test)]
use similar_asserts::assert_eq;
use thiserror::Error;

/// Kind of explicit binding
#[derive(Copy, Clone, Debug, Eq, Hash, PartialEq, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum BindKind {
    /// No binding
    None,

    /// One CPU per task, selected by rank
    Rank,

    /// One locality domain per task, selected by rank
    LdRank,

    /// Hexadecimal CPU masks
    Mask,

    /// CPU numbers
    Map,

    /// Hexadecimal locality domain masks
    LdMask,

    /// Locality domain numbers
    LdMap,
}
//
impl BindKind {
    /// Explicit binding kind requested by `bind_type`, if any
    ///
    /// When several kinds are requested, `none` takes precedence over `rank`,
    /// which takes precedence over `ldrank`, then `mask`, `map`, `ldmask` and
    /// finally `ldmap`.
    ///
    /// # Examples
    ///
    /// ```
    /// use taskbind::placement::{explicit::BindKind, policy::CpuBindType};
    ///
    /// assert_eq!(BindKind::from_bind_type(CpuBindType::TO_CORES), None);
    /// assert_eq!(
    ///     BindKind::from_bind_type(CpuBindType::MAP | CpuBindType::RANK),
    ///     Some(BindKind::Rank)
    /// );
    /// ```
    pub fn from_bind_type(bind_type: CpuBindType) -> Option<Self> {
        [
            (CpuBindType::NONE, Self::None),
            (CpuBindType::RANK, Self::Rank),
            (CpuBindType::LDRANK, Self::LdRank),
            (CpuBindType::MASK, Self::Mask),
            (CpuBindType::MAP, Self::Map),
            (CpuBindType::LDMASK, Self::LdMask),
            (CpuBindType::LDMAP, Self::LdMap),
        ]
        .into_iter()
        .find_map(|(flag, kind)| bind_type.contains(flag).then_some(kind))
    }

    /// Truth that this kind reads fields from the bind list
    pub fn needs_bind_list(self) -> bool {
        matches!(self, Self::Mask | Self::Map | Self::LdMask | Self::LdMap)
    }
}

/// Error while decoding a bind list
#[derive(Clone, Debug, Eq, Error, Hash, PartialEq)]
pub enum BindStringError {
    /// The binding kind needs a bind list, but none was provided
    #[error("no bind list was provided")]
    MissingBindList,

    /// The field selected for a task is empty
    #[error("field #{field} of the bind list is empty")]
    EmptyField {
        /// Index of the field
        field: usize,
    },

    /// A hexadecimal mask contains a character that is not a hex digit
    #[error("{0:?} is not an hexadecimal digit")]
    InvalidHexDigit(char),

    /// A CPU or domain number could not be parsed
    #[error("{0:?} is not a valid CPU or domain number")]
    InvalidNumber(String),

    /// A CPU number is too large to be part of an affinity mask
    #[error("CPU {cpu} is beyond the affinity mask limit of {} CPUs", MAX_CPUS)]
    CpuOutOfRange {
        /// Offending CPU number
        cpu: usize,
    },

    /// A locality domain does not exist on this node
    #[error("locality domain {domain} does not exist")]
    NoSuchDomain {
        /// Offending domain number
        domain: usize,
    },
}

/// Select the field of `list` that applies to task `task`
///
/// Fields are separated by commas. Tasks beyond the end of the list wrap
/// around to its beginning.
///
/// # Errors
///
/// - [`EmptyField`] if the selected field is empty
///
/// [`EmptyField`]: BindStringError::EmptyField
///
/// # Examples
///
/// ```
/// use taskbind::placement::explicit::select_field;
///
/// assert_eq!(select_field("0x1,0x2,0x4", 1).unwrap(), "0x2");
/// assert_eq!(select_field("0x1,0x2,0x4", 4).unwrap(), "0x2");
/// assert!(select_field("0x1,,0x4", 1).is_err());
/// ```
pub fn select_field(list: &str, task: usize) -> Result<&str, BindStringError> {
    let num_fields = list.split(',').count();
    let field = task % num_fields;
    let value = list
        .split(',')
        .nth(field)
        .map(str::trim)
        .unwrap_or_default();
    if value.is_empty() {
        return Err(BindStringError::EmptyField { field });
    }
    Ok(value)
}

/// Parse a decimal or `0x`-prefixed hexadecimal CPU or domain number
///
/// # Errors
///
/// - [`InvalidNumber`] if `field` is not a valid number
///
/// [`InvalidNumber`]: BindStringError::InvalidNumber
pub fn parse_number(field: &str) -> Result<usize, BindStringError> {
    let invalid = || BindStringError::InvalidNumber(field.to_owned());
    if let Some(hex) = field
        .strip_prefix("0x")
        .or_else(|| field.strip_prefix("0X"))
    {
        usize::from_str_radix(hex, 16).map_err(|_| invalid())
    } else {
        field.parse::<usize>().map_err(|_| invalid())
    }
}

/// Parse a hexadecimal mask with an optional `0x` prefix
///
/// Masks that reach beyond [`MAX_CPUS`] are rejected before any bit is set.
fn parse_mask(field: &str) -> Result<Bitmap, BindStringError> {
    let digits = field
        .strip_prefix("0x")
        .or_else(|| field.strip_prefix("0X"))
        .unwrap_or(field);
    if let Some(digit) = digits.chars().rev().find(|c| !c.is_ascii_hexdigit()) {
        return Err(BindStringError::InvalidHexDigit(digit));
    }
    let significant = digits.trim_start_matches('0');
    if let Some(leading) = significant.chars().next().and_then(|c| c.to_digit(16)) {
        let cpu = 4 * (significant.len() - 1) + leading.ilog2() as usize;
        check_cpu(cpu)?;
    }
    Bitmap::from_hex_str(field).map_err(|e| match e {
        ParseBitmapError::InvalidHexDigit(digit) => BindStringError::InvalidHexDigit(digit),
        ParseBitmapError::Empty | ParseBitmapError::InvalidListItem(_) => {
            BindStringError::InvalidNumber(field.to_owned())
        }
    })
}

/// Check that `cpu` fits in an affinity mask
fn check_cpu(cpu: usize) -> Result<usize, BindStringError> {
    if cpu >= MAX_CPUS {
        return Err(BindStringError::CpuOutOfRange { cpu });
    }
    Ok(cpu)
}

/// Decoder of explicit bind lists
#[derive(Clone, Debug)]
pub(crate) struct ExplicitDecoder<'a> {
    /// Node-wide placement parameters
    ctx: PlacementContext<'a>,

    /// Requested binding kind
    kind: BindKind,

    /// Bind list, if any
    list: Option<&'a str>,

    /// Number of distinct CPUs that rank binding cycles through
    rank_modulus: usize,
}
//
impl<'a> ExplicitDecoder<'a> {
    /// Set up a decoder for the bind list of `layout`
    ///
    /// `threads_per_core` is used to compute the number of CPUs that rank
    /// binding cycles through.
    pub(crate) fn new(
        ctx: PlacementContext<'a>,
        kind: BindKind,
        layout: &'a StepLayout,
        threads_per_core: usize,
    ) -> Self {
        let rank_modulus = (layout.cpus * threads_per_core.max(1)).max(1);
        Self {
            ctx,
            kind,
            list: layout.cpu_bind.as_deref(),
            rank_modulus,
        }
    }

    /// CPUs that task `task` asked to be bound to
    ///
    /// The result is not yet validated against the allowed CPUs.
    pub(crate) fn task_cpuset(&self, task: usize) -> Result<CpuSet, BindStringError> {
        let field = if self.kind.needs_bind_list() {
            let list = self.list.ok_or(BindStringError::MissingBindList)?;
            select_field(list, task)?
        } else {
            ""
        };
        let cpuset = match self.kind {
            BindKind::None => CpuSet::new(),
            BindKind::Rank => CpuSet::from(check_cpu(task % self.rank_modulus)?),
            BindKind::Mask => CpuSet::from(parse_mask(field)?),
            BindKind::Map => CpuSet::from(check_cpu(parse_number(field)?)?),
            BindKind::LdRank => self.domains_cpuset(std::iter::once(task))?,
            BindKind::LdMask => self.domains_cpuset(parse_mask(field)?.iter_set())?,
            BindKind::LdMap => self.domains_cpuset(std::iter::once(parse_number(field)?))?,
        };
        explain!(
            self.ctx.verbose,
            task,
            kind = %self.kind,
            field,
            %cpuset,
            "explicit binding"
        );
        Ok(cpuset)
    }

    /// CPUs of a set of locality domains
    ///
    /// Domains are looked up among the objects that tasks are bound to, then
    /// widened to the requested object type.
    fn domains_cpuset(
        &self,
        domains: impl IntoIterator<Item = usize>,
    ) -> Result<CpuSet, BindStringError> {
        let mut cpuset = CpuSet::new();
        for domain in domains {
            let object = self
                .ctx
                .topology
                .object_by_type(self.ctx.granularity.object_type, domain)
                .ok_or(BindStringError::NoSuchDomain { domain })?;
            self.ctx.add_object_cpuset(object, &mut cpuset);
        }
        Ok(cpuset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use similar_asserts::assert_eq;
    use crate::{
        placement::{policy::PlacementFlags, NodePlanner},
        topology::Topology,
    };

    /// Decode the bind list of `layout` for task `task`
    fn decode(topology: &Topology, layout: &StepLayout, task: usize) -> Result<CpuSet, BindStringError> {
        let planner = NodePlanner::new(topology, layout.clone(), PlacementFlags::empty());
        let kind = BindKind::from_bind_type(layout.cpu_bind_type).unwrap();
        let decoder = ExplicitDecoder::new(planner.context(), kind, layout, 1);
        decoder.task_cpuset(task)
    }

    #[test]
    fn kind_precedence() {
        assert_eq!(
            BindKind::from_bind_type(CpuBindType::NONE | CpuBindType::RANK),
            Some(BindKind::None)
        );
        assert_eq!(
            BindKind::from_bind_type(CpuBindType::LDRANK | CpuBindType::MASK),
            Some(BindKind::LdRank)
        );
        assert_eq!(
            BindKind::from_bind_type(CpuBindType::LDMAP | CpuBindType::LDMASK),
            Some(BindKind::LdMask)
        );
        assert_eq!(BindKind::from_bind_type(CpuBindType::empty()), None);
        assert_eq!(BindKind::LdMask.to_string(), "ldmask");
        assert_eq!(BindKind::Rank.to_string(), "rank");
        assert!(!BindKind::Rank.needs_bind_list());
    }

    #[test]
    fn fields_and_numbers() {
        assert_eq!(select_field("3", 7).unwrap(), "3");
        assert_eq!(select_field(" 1 , 2 ", 1).unwrap(), "2");
        assert_eq!(
            select_field("1,2,", 2),
            Err(BindStringError::EmptyField { field: 2 })
        );
        assert_eq!(select_field("", 0), Err(BindStringError::EmptyField { field: 0 }));
        assert_eq!(parse_number("12").unwrap(), 12);
        assert_eq!(parse_number("0x1f").unwrap(), 31);
        assert_eq!(
            parse_number("0xzz"),
            Err(BindStringError::InvalidNumber("0xzz".to_owned()))
        );
        assert_eq!(
            parse_number("-1"),
            Err(BindStringError::InvalidNumber("-1".to_owned()))
        );
    }

    #[test]
    fn rank() {
        let topology = Topology::from_synthetic("pack:1 core:4 pu:1").unwrap();
        let layout = StepLayout::new(6, 1)
            .with_cpus(4)
            .with_cpu_bind(CpuBindType::RANK, None);
        assert_eq!(decode(&topology, &layout, 2).unwrap(), CpuSet::from(2));
        assert_eq!(decode(&topology, &layout, 5).unwrap(), CpuSet::from(1));
    }

    #[test]
    fn masks_wrap_around() {
        let topology = Topology::from_synthetic("pack:1 core:4 pu:1").unwrap();
        let layout = StepLayout::new(5, 1).with_cpu_bind(CpuBindType::MASK, Some("0x1,0x2,0x4"));
        assert_eq!(decode(&topology, &layout, 0).unwrap(), CpuSet::from(0));
        assert_eq!(decode(&topology, &layout, 2).unwrap(), CpuSet::from(2));
        assert_eq!(decode(&topology, &layout, 4).unwrap(), CpuSet::from(1));

        let layout = layout.with_cpu_bind(CpuBindType::MASK, Some("3,c"));
        assert_eq!(decode(&topology, &layout, 1).unwrap(), CpuSet::from_range(2..4));
    }

    #[test]
    fn maps() {
        let topology = Topology::from_synthetic("pack:1 core:4 pu:1").unwrap();
        let layout = StepLayout::new(3, 1).with_cpu_bind(CpuBindType::MAP, Some("0x3,5,12"));
        assert_eq!(decode(&topology, &layout, 0).unwrap(), CpuSet::from(3));
        assert_eq!(decode(&topology, &layout, 1).unwrap(), CpuSet::from(5));
        assert_eq!(decode(&topology, &layout, 2).unwrap(), CpuSet::from(12));
    }

    #[test]
    fn locality_domains() {
        let topology = Topology::from_synthetic("numa:2 pack:1 core:2 pu:1").unwrap();

        let layout = StepLayout::new(2, 1).with_cpu_bind(CpuBindType::LDMASK, Some("0x3,0x2"));
        assert_eq!(decode(&topology, &layout, 0).unwrap(), CpuSet::from_range(0..4));
        assert_eq!(decode(&topology, &layout, 1).unwrap(), CpuSet::from_range(2..4));

        let layout = layout.with_cpu_bind(CpuBindType::LDMAP, Some("1,0"));
        assert_eq!(decode(&topology, &layout, 0).unwrap(), CpuSet::from_range(2..4));
        assert_eq!(decode(&topology, &layout, 1).unwrap(), CpuSet::from_range(0..2));

        let layout = layout.with_cpu_bind(CpuBindType::LDRANK, None);
        assert_eq!(decode(&topology, &layout, 1).unwrap(), CpuSet::from_range(2..4));
        assert_eq!(
            decode(&topology, &layout, 2),
            Err(BindStringError::NoSuchDomain { domain: 2 })
        );

        let layout = layout.with_cpu_bind(CpuBindType::LDMASK, Some("0x4"));
        assert_eq!(
            decode(&topology, &layout, 0),
            Err(BindStringError::NoSuchDomain { domain: 2 })
        );
    }

    #[test]
    fn decoding_errors() {
        let topology = Topology::from_synthetic("pack:1 core:4 pu:1").unwrap();
        let layout = |kind, list| StepLayout::new(4, 1).with_cpu_bind(kind, list);

        assert_eq!(
            decode(&topology, &layout(CpuBindType::MASK, None), 0),
            Err(BindStringError::MissingBindList)
        );
        assert_eq!(
            decode(&topology, &layout(CpuBindType::MASK, Some("0x1,,0x4")), 1),
            Err(BindStringError::EmptyField { field: 1 })
        );
        assert_eq!(
            decode(&topology, &layout(CpuBindType::MASK, Some("0xg")), 0),
            Err(BindStringError::InvalidHexDigit('g'))
        );
        assert_eq!(
            decode(&topology, &layout(CpuBindType::MAP, Some("abc")), 0),
            Err(BindStringError::InvalidNumber("abc".to_owned()))
        );
        assert_eq!(
            decode(&topology, &layout(CpuBindType::MAP, Some("4096")), 0),
            Err(BindStringError::CpuOutOfRange { cpu: 4096 })
        );
        assert_eq!(
            decode(&topology, &layout(CpuBindType::NONE, None), 0),
            Ok(CpuSet::new())
        );
    }

    #[test]
    fn huge_cpus_are_rejected_early() {
        let topology = Topology::from_synthetic("pack:1 core:4 pu:1").unwrap();
        let layout = |kind, list: &str| StepLayout::new(1, 1).with_cpu_bind(kind, Some(list));

        // CPU numbers are checked before any set is built
        let max = usize::MAX.to_string();
        assert_eq!(
            decode(&topology, &layout(CpuBindType::MAP, &max), 0),
            Err(BindStringError::CpuOutOfRange { cpu: usize::MAX })
        );
        let max = format!("{:#x}", usize::MAX);
        assert_eq!(
            decode(&topology, &layout(CpuBindType::MAP, &max), 0),
            Err(BindStringError::CpuOutOfRange { cpu: usize::MAX })
        );
        assert_eq!(
            decode(&topology, &layout(CpuBindType::MAP, "1023"), 0),
            Ok(CpuSet::from(1023))
        );

        // So are masks, from their number of significant digits
        let top_cpu = format!("0x8{}", "0".repeat(MAX_CPUS / 4 - 1));
        assert_eq!(
            decode(&topology, &layout(CpuBindType::MASK, &top_cpu), 0),
            Ok(CpuSet::from(MAX_CPUS - 1))
        );
        let beyond = format!("1{}", "0".repeat(MAX_CPUS / 4));
        assert_eq!(
            decode(&topology, &layout(CpuBindType::MASK, &beyond), 0),
            Err(BindStringError::CpuOutOfRange { cpu: MAX_CPUS })
        );
        let huge = "f".repeat(1 << 20);
        assert_eq!(
            decode(&topology, &layout(CpuBindType::MASK, &huge), 0),
            Err(BindStringError::CpuOutOfRange { cpu: 4 * (1 << 20) - 1 })
        );
        let padded = format!("0x{}1", "0".repeat(1 << 20));
        assert_eq!(
            decode(&topology, &layout(CpuBindType::MASK, &padded), 0),
            Ok(CpuSet::from(0))
        );
        assert_eq!(
            decode(&topology, &layout(CpuBindType::LDMASK, &huge), 0),
            Err(BindStringError::CpuOutOfRange { cpu: 4 * (1 << 20) - 1 })
        );
    }
}
