//! Conversion between the wire-form snapshot and normalized storage rows.

use crate::model::{
    CityId, Clouds, Condition, Coord, MainMetrics, Sys, Wind, WeatherSnapshot,
};

/// Scalar columns of the `snapshots` table.
#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotRow {
    pub city_id: CityId,
    pub base: Option<String>,
    pub visibility: Option<i64>,
    pub dt: Option<i64>,
    pub name: Option<String>,
    pub cod: Option<i64>,
    pub timezone: Option<i64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConditionRow {
    pub city_id: CityId,
    /// Position in the provider's list; conditions reload in this order.
    pub position: i64,
    pub condition_id: i64,
    pub main: String,
    pub description: String,
    pub icon: String,
}

/// A one-to-one child row: the owning city id plus the sub-entity.
#[derive(Debug, Clone, PartialEq)]
pub struct ChildRow<T> {
    pub city_id: CityId,
    pub value: T,
}

/// Every row that makes up one stored snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotRows {
    pub head: SnapshotRow,
    pub coord: Option<ChildRow<Coord>>,
    pub conditions: Vec<ConditionRow>,
    pub main: Option<ChildRow<MainMetrics>>,
    pub wind: Option<ChildRow<Wind>>,
    pub clouds: Option<ChildRow<Clouds>>,
    pub sys: Option<ChildRow<Sys>>,
}

impl SnapshotRows {
    pub fn from_snapshot(snapshot: &WeatherSnapshot) -> Self {
        let city_id = snapshot.id;

        Self {
            head: SnapshotRow {
                city_id,
                base: snapshot.base.clone(),
                visibility: snapshot.visibility,
                dt: snapshot.dt,
                name: snapshot.name.clone(),
                cod: snapshot.cod,
                timezone: snapshot.timezone,
            },
            coord: snapshot.coord.map(|value| ChildRow { city_id, value }),
            conditions: snapshot
                .conditions
                .iter()
                .enumerate()
                .map(|(position, c)| ConditionRow {
                    city_id,
                    position: position as i64,
                    condition_id: c.id,
                    main: c.main.clone(),
                    description: c.description.clone(),
                    icon: c.icon.clone(),
                })
                .collect(),
            main: snapshot.main.map(|value| ChildRow { city_id, value }),
            wind: snapshot.wind.map(|value| ChildRow { city_id, value }),
            clouds: snapshot.clouds.map(|value| ChildRow { city_id, value }),
            sys: snapshot.sys.clone().map(|value| ChildRow { city_id, value }),
        }
    }

    pub fn into_snapshot(self) -> WeatherSnapshot {
        let mut conditions = self.conditions;
        conditions.sort_by_key(|row| row.position);

        WeatherSnapshot {
            coord: self.coord.map(|row| row.value),
            conditions: conditions
                .into_iter()
                .map(|row| Condition {
                    id: row.condition_id,
                    main: row.main,
                    description: row.description,
                    icon: row.icon,
                })
                .collect(),
            base: self.head.base,
            main: self.main.map(|row| row.value),
            visibility: self.head.visibility,
            wind: self.wind.map(|row| row.value),
            clouds: self.clouds.map(|row| row.value),
            dt: self.head.dt,
            sys: self.sys.map(|row| row.value),
            id: self.head.city_id,
            name: self.head.name,
            cod: self.head.cod,
            timezone: self.head.timezone,
        }
    }
}
