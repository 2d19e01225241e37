// GraphQL operations issued against the BirdWeather API
// https://app.birdweather.com/graphql

/// Detections for a station set and period, first N sorted by timestamp.
pub const DETECTIONS: &str = r#"
  query detections($stationIds: [ID!], $period: InputDuration, $first: Int) {
    detections(stationIds: $stationIds, period: $period, first: $first, sortBy: "timestamp") {
      nodes {
        id
        timestamp
        confidence
        probability
        score
        species { id commonName scientificName thumbnailUrl color }
        station { id name location }
      }
      totalCount
      speciesCount
    }
  }
"#;

/// Cursor-paginated variant used for the historical backfill.
pub const HISTORICAL_DETECTIONS: &str = r#"
  query historicalDetections($stationIds: [ID!], $period: InputDuration, $first: Int, $after: String) {
    detections(stationIds: $stationIds, period: $period, first: $first, after: $after, sortBy: "timestamp") {
      nodes {
        id
        timestamp
        confidence
        probability
        score
        species { id commonName scientificName thumbnailUrl color }
        station { id name location }
      }
      pageInfo { hasNextPage endCursor }
    }
  }
"#;

pub const STATION_INFO: &str = r#"
  query stationInfo($id: ID!) {
    station(id: $id) {
      id
      name
      location
      country
      state
      coords { lat lon }
      type
      latestDetectionAt
      earliestDetectionAt
      timezone
      weather {
        temp description humidity windSpeed pressure visibility cloudiness
        feelsLike windDir windGust rain1h rain3h snow1h snow3h sunrise sunset
        tempMax tempMin timestamp groundLevel seaLevel
        coords { lat lon }
      }
      counts { detections species }
    }
  }
"#;

pub const SEARCH_STATIONS: &str = r#"
  query searchStations($query: String, $first: Int) {
    stations(query: $query, first: $first) {
      nodes {
        id
        name
        location
        country
        state
        coords { lat lon }
        type
        latestDetectionAt
        counts { detections species }
      }
      totalCount
    }
  }
"#;

pub const TOP_SPECIES: &str = r#"
  query topSpecies($stationIds: [ID!], $period: InputDuration, $limit: Int) {
    topSpecies(stationIds: $stationIds, period: $period, limit: $limit) {
      count
      averageProbability
      species { id commonName scientificName thumbnailUrl color }
      speciesId
    }
  }
"#;

pub const TIME_OF_DAY_COUNTS: &str = r#"
  query timeOfDayDetectionCounts($stationIds: [ID!], $period: InputDuration) {
    timeOfDayDetectionCounts(stationIds: $stationIds, period: $period) {
      species { id commonName scientificName thumbnailUrl color }
      speciesId
      count
      bins { count key }
    }
  }
"#;

pub const DAILY_DETECTION_COUNTS: &str = r#"
  query dailyDetectionCounts($stationIds: [ID!], $period: InputDuration) {
    dailyDetectionCounts(stationIds: $stationIds, period: $period) {
      date
      total
      counts {
        count
        species { id commonName scientificName thumbnailUrl color }
        speciesId
      }
    }
  }
"#;

pub const COUNTS: &str = r#"
  query counts($stationIds: [ID!], $period: InputDuration) {
    counts(stationIds: $stationIds, period: $period) {
      detections
      species
      stations
      birdnet
    }
  }
"#;

/// Operation name as written after `query`, for logs and mock routing.
pub fn operation_name(query: &str) -> &str {
    query
        .split_whitespace()
        .skip_while(|w| *w != "query")
        .nth(1)
        .map(|w| w.split('(').next().unwrap_or(w))
        .unwrap_or("anonymous")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operation_names_are_extracted() {
        assert_eq!(operation_name(DETECTIONS), "detections");
        assert_eq!(operation_name(HISTORICAL_DETECTIONS), "historicalDetections");
        assert_eq!(operation_name(COUNTS), "counts");
        assert_eq!(operation_name("{ ping }"), "anonymous");
    }
}
